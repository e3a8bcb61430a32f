//! Client-facing operations: submit an import and report on it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatcher::{DispatchOutcome, ExecutionDispatcher};
use crate::events::{JobEvent, JobEventPayload};
use crate::job::{ImportJob, JobId, JobMode, JobStatus, JobSummary, TaskId};
use crate::logs::{LogEntry, LogFilter};
use crate::request::{ImportRequest, RequestError};
use crate::store::{JobFilter, JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::NotFound(_)))
    }
}

/// Answer to a submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// The job as stored after dispatch.
    pub job: JobSummary,
    pub outcome: DispatchOutcome,
    /// `worker` or `immediate`.
    pub execution_mode: String,
    pub worker_count: usize,
}

/// Point-in-time view of a job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub site_code: String,
    pub mode: JobMode,
    pub status: JobStatus,
    pub success: bool,
    pub has_errors: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub task_ref: Option<TaskId>,
    pub logs_count: usize,
    pub error_logs_count: usize,
    /// Workers available right now.
    pub worker_count: usize,
}

/// Submits imports and reports on them.
#[derive(Clone)]
pub struct ImportService {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<ExecutionDispatcher>,
}

impl std::fmt::Debug for ImportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportService")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ImportService {
    pub fn new(dispatcher: Arc<ExecutionDispatcher>) -> Self {
        Self {
            store: dispatcher.store(),
            dispatcher,
        }
    }

    /// Validate `request`, record a pending job and dispatch it.
    pub async fn execute(&self, request: ImportRequest) -> Result<SubmitResponse, ServiceError> {
        let request = request.validate()?;
        let job = self
            .store
            .create(ImportJob::new(request.site_code, request.mode, request.settings))
            .await?;
        tracing::info!(job_id = %job.id, site_code = %job.site_code, mode = %job.mode, "import job created");

        let created = JobEvent::for_job(
            job.id,
            JobEventPayload::Created {
                site_code: job.site_code.clone(),
                mode: job.mode,
            },
        );
        if let Err(err) = self.dispatcher.events().publish(created).await {
            tracing::warn!(job_id = %job.id, "failed to publish job event: {err}");
        }

        let outcome = self.dispatcher.submit(job.id).await;
        let summary = self.store.summary(job.id).await?;

        Ok(SubmitResponse {
            job: summary,
            execution_mode: outcome.execution_mode().to_string(),
            worker_count: outcome.worker_count(),
            outcome,
        })
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatusReport, ServiceError> {
        let summary = self.store.summary(job_id).await?;
        let worker_count = self.dispatcher.worker_count().await;
        let job = summary.job;

        Ok(JobStatusReport {
            job_id: job.id,
            site_code: job.site_code,
            mode: job.mode,
            status: job.status,
            success: summary.success,
            has_errors: summary.has_errors,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            task_ref: job.task_ref,
            logs_count: summary.logs_count,
            error_logs_count: summary.error_logs_count,
            worker_count,
        })
    }

    /// Jobs matching `filter`, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<ImportJob>, ServiceError> {
        Ok(self.store.list(filter).await?)
    }

    /// A job's log in order. Fails with not-found for unknown jobs.
    pub async fn logs(&self, job_id: JobId, filter: &LogFilter) -> Result<Vec<LogEntry>, ServiceError> {
        if self.store.get(job_id).await?.is_none() {
            return Err(StoreError::NotFound(job_id).into());
        }
        Ok(self.store.logs(job_id, filter).await?)
    }
}
