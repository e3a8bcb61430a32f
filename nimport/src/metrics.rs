//! Prometheus metrics for import job orchestration.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `nimport_jobs_submitted_total` - Submissions by execution path
//! - `nimport_jobs_finished_total` - Jobs reaching a terminal state
//! - `nimport_job_retries_total` - Retries scheduled after failed attempts
//!
//! ## Histograms
//! - `nimport_job_duration_seconds` - Execution attempt duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, HistogramVec, Opts, Registry, exponential_buckets};
use std::sync::LazyLock;

/// Global Prometheus registry for nimport metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels:
/// - `execution_mode`: `worker` or `immediate`
pub static JOBS_SUBMITTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "nimport_jobs_submitted_total",
        "Total number of import jobs submitted",
    );
    CounterVec::new(opts, &["execution_mode"])
        .expect("nimport_jobs_submitted_total metric creation failed")
});

/// Labels:
/// - `mode`: `apply` or `check`
/// - `status`: `completed` or `failed`
pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "nimport_jobs_finished_total",
        "Total number of import jobs that reached a terminal state",
    );
    CounterVec::new(opts, &["mode", "status"])
        .expect("nimport_jobs_finished_total metric creation failed")
});

/// Labels:
/// - `mode`: `apply` or `check`
pub static JOB_RETRIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "nimport_job_retries_total",
        "Total number of retries scheduled for queued executions",
    );
    CounterVec::new(opts, &["mode"]).expect("nimport_job_retries_total metric creation failed")
});

/// Labels:
/// - `mode`: `apply` or `check`
/// - `status`: attempt outcome (`completed`, `failed`, `retrying`)
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.01, 2.0, 16).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "nimport_job_duration_seconds",
        "Import execution attempt duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["mode", "status"])
        .expect("nimport_job_duration_seconds metric creation failed")
});

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_SUBMITTED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOB_RETRIES_TOTAL.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_submitted(execution_mode: &str) {
    JOBS_SUBMITTED_TOTAL
        .with_label_values(&[execution_mode])
        .inc();
}

pub fn record_job_finished(mode: &str, status: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[mode, status]).inc();
}

pub fn record_job_retry(mode: &str) {
    JOB_RETRIES_TOTAL.with_label_values(&[mode]).inc();
}

pub fn observe_job_duration(mode: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[mode, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should be a no-op");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_job_submitted("worker");
        record_job_finished("check", "completed");
        record_job_retry("apply");
        observe_job_duration("apply", "failed", 0.5);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("nimport_jobs_submitted_total"));
        assert!(output.contains("nimport_jobs_finished_total"));
        assert!(output.contains("nimport_job_retries_total"));
        assert!(output.contains("nimport_job_duration_seconds"));
    }
}
