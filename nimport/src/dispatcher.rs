//! Execution dispatch.
//!
//! A submitted job runs on background workers when any are available and
//! inline otherwise. Both paths share [`ExecutionDispatcher::execute_job`]'s
//! attempt logic: resolve the configuration, drive the engine, record the
//! outcome, all while the job holds the log capture. Only queued executions
//! are retried; an inline run gets exactly one attempt.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::capture::{EXECUTION_TARGET, LogSink};
use crate::engine::{EngineError, EngineFactory, ExecutionReport, InventoryFilter, run_mode};
use crate::events::{JobEvent, JobEventPayload, JobEventPublisher};
use crate::job::{ImportJob, JobId, JobStatus, TaskId};
use crate::logs::{LogLevel, NewLogEntry};
use crate::queue::{ExecutionTask, QueueError, TaskQueue};
use crate::resolver::{ConfigResolver, ResolvedConfig};
use crate::retry::RetryPolicy;
use crate::store::{JobStore, StoreError};
use crate::telemetry;
use crate::workers::WorkerAvailabilityProbe;

/// Why an execution did not complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Payload validation or credential lookup failed.
    Config,
    /// The engine raised or panicked during init, diff or sync, or
    /// reported rejected changes.
    Engine,
    NotFound,
    /// The job was not in a state that allows execution.
    InvalidState,
    Store,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Config => "config",
            FailureKind::Engine => "engine",
            FailureKind::NotFound => "not_found",
            FailureKind::InvalidState => "invalid_state",
            FailureKind::Store => "store",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&StoreError> for FailureKind {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FailureKind::NotFound,
            StoreError::InvalidTransition { .. } => FailureKind::InvalidState,
            StoreError::Backend(_) => FailureKind::Store,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Final result of executing a job.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionResult {
    Completed {
        job_id: JobId,
        report: ExecutionReport,
    },
    Failed {
        job_id: JobId,
        failure: ExecutionFailure,
    },
}

impl ExecutionResult {
    pub fn failed(job_id: JobId, kind: FailureKind, message: impl Into<String>) -> Self {
        ExecutionResult::Failed {
            job_id,
            failure: ExecutionFailure {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            ExecutionResult::Completed { job_id, .. } | ExecutionResult::Failed { job_id, .. } => {
                *job_id
            }
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExecutionResult::Completed { .. })
    }

    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            ExecutionResult::Completed { report, .. } => Some(report),
            ExecutionResult::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            ExecutionResult::Failed { failure, .. } => Some(failure),
            ExecutionResult::Completed { .. } => None,
        }
    }
}

/// How a submission was handled.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Handed to background workers; the job is `queued`.
    Queued {
        task_id: TaskId,
        worker_count: usize,
    },
    /// Ran inline; the job is terminal.
    ExecutedImmediately {
        result: ExecutionResult,
        worker_count: usize,
    },
}

impl DispatchOutcome {
    /// `worker` or `immediate`.
    pub fn execution_mode(&self) -> &'static str {
        match self {
            DispatchOutcome::Queued { .. } => "worker",
            DispatchOutcome::ExecutedImmediately { .. } => "immediate",
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, DispatchOutcome::Queued { .. })
    }

    /// Workers the probe reported at submission.
    pub fn worker_count(&self) -> usize {
        match self {
            DispatchOutcome::Queued { worker_count, .. }
            | DispatchOutcome::ExecutedImmediately { worker_count, .. } => *worker_count,
        }
    }

    /// The inline result, `None` while queued.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            DispatchOutcome::ExecutedImmediately { result, .. } => Some(result),
            DispatchOutcome::Queued { .. } => None,
        }
    }
}

/// What a worker did with one task.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Finished(ExecutionResult),
    /// The attempt failed and `next_attempt` was scheduled after `delay`.
    RetryScheduled { next_attempt: u32, delay: Duration },
}

/// The job could not be handed to workers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

enum AttemptOutcome {
    Finished(ExecutionResult),
    Retry { job: ImportJob, error: String },
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Finished(result) if result.success() => "completed",
            AttemptOutcome::Finished(_) => "failed",
            AttemptOutcome::Retry { .. } => "retrying",
        }
    }
}

/// Decides where a job runs and carries out execution attempts.
pub struct ExecutionDispatcher {
    store: Arc<dyn JobStore>,
    resolver: ConfigResolver,
    engines: Arc<dyn EngineFactory>,
    probe: Arc<dyn WorkerAvailabilityProbe>,
    queue: Arc<dyn TaskQueue>,
    sink: LogSink,
    events: Arc<dyn JobEventPublisher>,
    retry: RetryPolicy,
}

impl fmt::Debug for ExecutionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionDispatcher")
            .field("sink", &self.sink)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ExecutionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: ConfigResolver,
        engines: Arc<dyn EngineFactory>,
        probe: Arc<dyn WorkerAvailabilityProbe>,
        queue: Arc<dyn TaskQueue>,
        sink: LogSink,
        events: Arc<dyn JobEventPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            engines,
            probe,
            queue,
            sink,
            events,
            retry,
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<dyn JobEventPublisher> {
        Arc::clone(&self.events)
    }

    pub fn log_sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Number of workers the probe reports right now.
    pub async fn worker_count(&self) -> usize {
        self.probe.active_worker_count().await
    }

    /// Run `job_id` on workers if any are available, inline otherwise.
    ///
    /// Never fails: problems are reported through the outcome and the job
    /// record.
    pub async fn submit(&self, job_id: JobId) -> DispatchOutcome {
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(%job_id, "submitted job does not exist");
                return DispatchOutcome::ExecutedImmediately {
                    result: not_found(job_id),
                    worker_count: 0,
                };
            }
            Err(err) => {
                tracing::error!(%job_id, "failed to load submitted job: {err}");
                return DispatchOutcome::ExecutedImmediately {
                    result: ExecutionResult::failed(job_id, FailureKind::Store, err.to_string()),
                    worker_count: 0,
                };
            }
        };

        let span = telemetry::job_submit_span(job_id.to_string(), &job.site_code);
        self.submit_job(job).instrument(span).await
    }

    async fn submit_job(&self, job: ImportJob) -> DispatchOutcome {
        let worker_count = self.probe.active_worker_count().await;
        if worker_count > 0 {
            match self.enqueue(&job, worker_count).await {
                Ok(task_id) => {
                    telemetry::record_job_submitted(&job.site_code, "worker");
                    return DispatchOutcome::Queued {
                        task_id,
                        worker_count,
                    };
                }
                Err(err) => {
                    tracing::warn!(job_id = %job.id, "could not queue job, running inline: {err}");
                }
            }
        }

        telemetry::record_job_submitted(&job.site_code, "immediate");
        DispatchOutcome::ExecutedImmediately {
            result: self.execute_job(job.id).await,
            worker_count,
        }
    }

    async fn enqueue(&self, job: &ImportJob, worker_count: usize) -> Result<TaskId, DispatchError> {
        if job.status != JobStatus::Queued {
            self.store
                .transition(job.id, JobStatus::Queued, Utc::now())
                .await?;
        }
        let task_id = self.queue.enqueue(ExecutionTask::first(job)).await?;

        // The task is out; a missing reference must not trigger a second run.
        if let Err(err) = self.store.set_task_ref(job.id, task_id.clone()).await {
            tracing::warn!(job_id = %job.id, %task_id, "failed to record task reference: {err}");
        }
        self.publish(JobEvent::for_job(
            job.id,
            JobEventPayload::Queued {
                task_id: task_id.clone(),
                worker_count,
            },
        ))
        .await;
        Ok(task_id)
    }

    /// Execute `job_id` inline with a single attempt.
    pub async fn execute_job(&self, job_id: JobId) -> ExecutionResult {
        match self.execute_attempt(job_id, 1, false).await {
            AttemptOutcome::Finished(result) => result,
            AttemptOutcome::Retry { job, error } => self.fail(&job, FailureKind::Engine, error).await,
        }
    }

    /// Execute one queued task, scheduling a retry when the engine fails
    /// and attempts remain.
    pub async fn handle_task(&self, task: ExecutionTask) -> TaskOutcome {
        let may_retry = self.retry.should_retry(task.attempt);
        let (job, error) = match self.execute_attempt(task.job_id, task.attempt, may_retry).await {
            AttemptOutcome::Finished(result) => return TaskOutcome::Finished(result),
            AttemptOutcome::Retry { job, error } => (job, error),
        };

        let delay = self.retry.delay_for(task.attempt);
        let next = task.next_attempt();
        let next_attempt = next.attempt;
        self.note(
            job.id,
            LogLevel::Warning,
            format!(
                "Attempt {} of {} failed, retrying in {}s",
                task.attempt,
                self.retry.max_retries + 1,
                delay.as_secs()
            ),
        )
        .await;

        match self.queue.enqueue_after(next, delay).await {
            Ok(_) => {
                telemetry::record_job_retry(job.id.to_string(), job.mode.as_str(), task.attempt, delay);
                self.publish(JobEvent::for_job(
                    job.id,
                    JobEventPayload::RetryScheduled {
                        attempt: task.attempt,
                        delay_ms: delay.as_millis() as u64,
                        error,
                    },
                ))
                .await;
                TaskOutcome::RetryScheduled {
                    next_attempt,
                    delay,
                }
            }
            Err(err) => {
                let message = format!("{error} (retry could not be scheduled: {err})");
                TaskOutcome::Finished(self.fail(&job, FailureKind::Engine, message).await)
            }
        }
    }

    async fn execute_attempt(&self, job_id: JobId, attempt: u32, may_retry: bool) -> AttemptOutcome {
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(%job_id, "job not found, nothing to execute");
                return AttemptOutcome::Finished(not_found(job_id));
            }
            Err(err) => {
                tracing::error!(%job_id, "failed to load job: {err}");
                return AttemptOutcome::Finished(ExecutionResult::failed(
                    job_id,
                    FailureKind::Store,
                    err.to_string(),
                ));
            }
        };

        if job.status.is_terminal() {
            tracing::warn!(%job_id, status = %job.status, "job already finished, not executing");
            return AttemptOutcome::Finished(ExecutionResult::failed(
                job_id,
                FailureKind::InvalidState,
                format!("Job {job_id} is already {}", job.status),
            ));
        }

        let mode = job.mode;
        telemetry::instrument_execution(job_id.to_string(), mode.as_str(), attempt, async move {
            let timing = telemetry::record_job_start(job_id.to_string());
            let capture = self.sink.acquire(job_id).await;
            let outcome = self.run_captured(job, attempt, may_retry).await;
            capture.release().await;
            telemetry::record_job_end(timing, mode.as_str(), outcome.label());
            outcome
        })
        .await
    }

    async fn run_captured(&self, job: ImportJob, attempt: u32, may_retry: bool) -> AttemptOutcome {
        tracing::info!(
            target: EXECUTION_TARGET,
            "Starting network import ({} mode) for site: {}",
            job.mode,
            job.site_code
        );

        let config = match self.resolver.resolve(&job.site_code, &job.config_data).await {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(target: EXECUTION_TARGET, "Configuration error: {err}");
                return AttemptOutcome::Finished(
                    self.fail(&job, FailureKind::Config, err.to_string()).await,
                );
            }
        };
        tracing::debug!(
            target: EXECUTION_TARGET,
            "Resolved configuration: {}",
            config.sanitized()
        );

        if job.status != JobStatus::Running {
            if let Err(err) = self
                .store
                .transition(job.id, JobStatus::Running, Utc::now())
                .await
            {
                tracing::error!(target: EXECUTION_TARGET, "Could not start import: {err}");
                return AttemptOutcome::Finished(ExecutionResult::failed(
                    job.id,
                    FailureKind::from(&err),
                    err.to_string(),
                ));
            }
        }
        self.publish(JobEvent::for_job(job.id, JobEventPayload::Started { attempt }))
            .await;

        match self.run_engine(&config, &job).await {
            Ok(report) => AttemptOutcome::Finished(self.complete(&job, report).await),
            Err(err) => {
                tracing::error!(target: EXECUTION_TARGET, "Network import failed: {err}");
                if may_retry {
                    AttemptOutcome::Retry {
                        job,
                        error: err.to_string(),
                    }
                } else {
                    AttemptOutcome::Finished(
                        self.fail(&job, FailureKind::Engine, err.to_string()).await,
                    )
                }
            }
        }
    }

    async fn run_engine(
        &self,
        config: &ResolvedConfig,
        job: &ImportJob,
    ) -> Result<ExecutionReport, EngineError> {
        let run = async {
            let mut engine = self.engines.create(config, job.mode).await?;
            run_mode(&mut *engine, job.mode, &InventoryFilter::site(&job.site_code)).await
        };

        // Engine panics fail the attempt like any other engine error.
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(EngineError::Other(anyhow::anyhow!(
                "engine panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn complete(&self, job: &ImportJob, report: ExecutionReport) -> ExecutionResult {
        if let Some(message) = report.failure_message() {
            tracing::error!(
                target: EXECUTION_TARGET,
                "Network import ({} mode) completed with errors: {message}",
                job.mode
            );
            return self.fail(job, FailureKind::Engine, message).await;
        }

        tracing::info!(
            target: EXECUTION_TARGET,
            "Network import completed: {}",
            report.diff
        );

        if let Err(err) = self
            .store
            .transition(job.id, JobStatus::Completed, Utc::now())
            .await
        {
            tracing::error!(target: EXECUTION_TARGET, "Could not record completion: {err}");
            return ExecutionResult::failed(job.id, FailureKind::from(&err), err.to_string());
        }

        telemetry::record_job_finished(
            job.id.to_string(),
            job.mode.as_str(),
            JobStatus::Completed.as_str(),
        );
        self.publish(JobEvent::for_job(
            job.id,
            JobEventPayload::Completed {
                changes_detected: report.changes_detected,
                changes_applied: report.changes_applied,
            },
        ))
        .await;

        ExecutionResult::Completed {
            job_id: job.id,
            report,
        }
    }

    async fn fail(&self, job: &ImportJob, kind: FailureKind, message: String) -> ExecutionResult {
        match self
            .store
            .transition(job.id, JobStatus::Failed, Utc::now())
            .await
        {
            Ok(_) => telemetry::record_job_finished(
                job.id.to_string(),
                job.mode.as_str(),
                JobStatus::Failed.as_str(),
            ),
            Err(err) => tracing::warn!(job_id = %job.id, "could not mark job failed: {err}"),
        }

        self.publish(JobEvent::for_job(
            job.id,
            JobEventPayload::Failed {
                kind,
                error: message.clone(),
            },
        ))
        .await;

        ExecutionResult::failed(job.id, kind, message)
    }

    /// Append a line to the job log outside of a capture.
    async fn note(&self, job_id: JobId, level: LogLevel, message: String) {
        let entry = NewLogEntry::new(level, message, EXECUTION_TARGET);
        if let Err(err) = self.store.append_log(job_id, entry).await {
            tracing::warn!(%job_id, "failed to append job log: {err}");
        }
    }

    async fn publish(&self, event: JobEvent) {
        if let Err(err) = self.events.publish(event).await {
            tracing::warn!("failed to publish job event: {err}");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn not_found(job_id: JobId) -> ExecutionResult {
    ExecutionResult::failed(job_id, FailureKind::NotFound, format!("Job {job_id} not found"))
}
