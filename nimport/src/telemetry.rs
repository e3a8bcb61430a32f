//! Tracing and telemetry instrumentation for nimport.
//!
//! Span constructors and `record_*` helpers for the job lifecycle. Every
//! helper logs through `tracing` and, with the `metrics` feature, updates
//! the matching Prometheus series.
//!
//! [`init_tracing`] installs the process subscriber: a formatted console
//! layer filtered by `RUST_LOG` and the unfiltered per-job capture layer.

use std::future::Future;
use std::sync::Arc;

use tracing::{Instrument, Span, info_span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::capture::{CaptureLayer, ChannelTable};

/// Span covering one submission, from probe to outcome.
#[must_use]
pub fn job_submit_span(job_id: impl AsRef<str>, site_code: impl AsRef<str>) -> Span {
    info_span!(
        "nimport.submit",
        job_id = %job_id.as_ref(),
        site_code = %site_code.as_ref(),
    )
}

/// Span covering one execution attempt.
#[must_use]
pub fn job_execute_span(job_id: impl AsRef<str>, mode: impl AsRef<str>, attempt: u32) -> Span {
    info_span!(
        "nimport.execute",
        job_id = %job_id.as_ref(),
        mode = %mode.as_ref(),
        attempt = attempt,
    )
}

/// Span covering a worker handling one queued task.
#[must_use]
pub fn worker_task_span(worker_id: impl AsRef<str>, task_id: impl AsRef<str>) -> Span {
    info_span!(
        "nimport.task",
        worker_id = %worker_id.as_ref(),
        task_id = %task_id.as_ref(),
    )
}

/// Attach an execution span to `future`.
pub fn instrument_execution<F>(
    job_id: impl AsRef<str>,
    mode: impl AsRef<str>,
    attempt: u32,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(job_execute_span(job_id, mode, attempt))
}

/// Record a submission and the path it took (`worker` or `immediate`).
pub fn record_job_submitted(site_code: impl AsRef<str>, execution_mode: impl AsRef<str>) {
    tracing::info!(
        site_code = %site_code.as_ref(),
        execution_mode = %execution_mode.as_ref(),
        "job submitted"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_submitted(execution_mode.as_ref());
}

/// Record a job reaching a terminal state.
pub fn record_job_finished(
    job_id: impl AsRef<str>,
    mode: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        mode = %mode.as_ref(),
        status = %status.as_ref(),
        "job finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_finished(mode.as_ref(), status.as_ref());
}

/// Record a retry being scheduled after a failed attempt.
pub fn record_job_retry(
    job_id: impl AsRef<str>,
    mode: impl AsRef<str>,
    attempt: u32,
    delay: std::time::Duration,
) {
    tracing::warn!(
        job_id = %job_id.as_ref(),
        mode = %mode.as_ref(),
        attempt = attempt,
        delay_secs = delay.as_secs(),
        "job retry scheduled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_retry(mode.as_ref());
}

/// Observe the duration of an execution attempt.
pub fn observe_job_duration(mode: impl AsRef<str>, status: impl AsRef<str>, duration_secs: f64) {
    tracing::debug!(
        mode = %mode.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(mode.as_ref(), status.as_ref(), duration_secs);
}

/// Start timing an execution attempt. Pass the handle to [`record_job_end`].
pub fn record_job_start(job_id: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

pub fn record_job_end(handle: JobTimingHandle, mode: impl AsRef<str>, status: impl AsRef<str>) {
    observe_job_duration(mode, status, handle.start.elapsed().as_secs_f64());
}

/// Handle for tracking execution duration.
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

/// Install the global subscriber.
///
/// Console output honours `RUST_LOG` and falls back to `default_directive`.
/// The capture layer sees every event so engine debug output reaches job
/// logs regardless of the console level.
pub fn init_tracing(table: Arc<ChannelTable>, default_directive: &str) -> anyhow::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(CaptureLayer::new(table))
        .try_init()?;
    Ok(())
}
