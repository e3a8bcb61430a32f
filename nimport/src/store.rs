use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::job::{ImportJob, JobId, JobMode, JobStatus, JobSummary, TaskId};
use crate::logs::{LogEntry, LogFilter, NewLogEntry};

/// Errors raised by a [`JobStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {job_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Filter for listing jobs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub site_code: Option<String>,
    pub mode: Option<JobMode>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn matches(&self, job: &ImportJob) -> bool {
        self.site_code
            .as_deref()
            .is_none_or(|site| job.site_code == site)
            && self.mode.is_none_or(|mode| job.mode == mode)
            && self.status.is_none_or(|status| job.status == status)
    }
}

/// Counts removed by a retention sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeletedCounts {
    pub jobs: u64,
    pub logs: u64,
}

/// Durable storage for jobs and their logs.
///
/// Implementations must make `transition` atomic per job: concurrent calls
/// for the same job observe each other's result, and a transition the state
/// machine does not allow fails with [`StoreError::InvalidTransition`]
/// without touching the record.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. The job is stored as given.
    async fn create(&self, job: ImportJob) -> Result<ImportJob, StoreError>;

    /// Fetch a job, `None` when it does not exist.
    async fn get(&self, id: JobId) -> Result<Option<ImportJob>, StoreError>;

    /// Move a job to `to`, stamping `started_at` on the first entry into
    /// `running` and `completed_at` on entry into a terminal state.
    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<ImportJob, StoreError>;

    /// Record the external task reference of a queued execution.
    async fn set_task_ref(&self, id: JobId, task: TaskId) -> Result<(), StoreError>;

    /// Append a log entry. Timestamps are clamped so a job's log never goes
    /// backwards in time.
    async fn append_log(&self, id: JobId, entry: NewLogEntry) -> Result<LogEntry, StoreError>;

    /// A job's log in append order.
    async fn logs(&self, id: JobId, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError>;

    /// Jobs matching `filter`, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<ImportJob>, StoreError>;

    /// Delete jobs created before `cutoff` together with their logs.
    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<DeletedCounts, StoreError>;

    async fn has_errors(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(!self.logs(id, &LogFilter::errors()).await?.is_empty())
    }

    async fn summary(&self, id: JobId) -> Result<JobSummary, StoreError> {
        let job = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        let logs = self.logs(id, &LogFilter::default()).await?;
        let error_logs_count = logs.iter().filter(|entry| entry.level.is_error()).count();
        Ok(JobSummary {
            success: job.success(),
            has_errors: error_logs_count > 0,
            logs_count: logs.len(),
            error_logs_count,
            job,
        })
    }
}

/// Applies a transition to an in-memory record, enforcing the state machine
/// and timestamp ordering.
pub(crate) fn apply_transition(
    job: &mut ImportJob,
    to: JobStatus,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !job.status.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to,
        });
    }

    if to == JobStatus::Running && job.started_at.is_none() {
        job.started_at = Some(at.max(job.created_at));
    }
    if to.is_terminal() {
        let floor = job.started_at.unwrap_or(job.created_at);
        job.completed_at = Some(at.max(floor));
    }
    job.status = to;
    Ok(())
}

#[derive(Debug)]
struct StoredJob {
    job: ImportJob,
    logs: Vec<LogEntry>,
}

/// [`JobStore`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, StoredJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: ImportJob) -> Result<ImportJob, StoreError> {
        let mut jobs = self.jobs.lock();
        jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                logs: Vec::new(),
            },
        );
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<ImportJob>, StoreError> {
        Ok(self.jobs.lock().get(&id).map(|stored| stored.job.clone()))
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<ImportJob, StoreError> {
        let mut jobs = self.jobs.lock();
        let job = &mut jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?.job;
        apply_transition(job, to, at)?;
        Ok(job.clone())
    }

    async fn set_task_ref(&self, id: JobId, task: TaskId) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        let job = &mut jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?.job;
        job.task_ref = Some(task);
        Ok(())
    }

    async fn append_log(&self, id: JobId, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        let mut jobs = self.jobs.lock();
        let stored = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let (sequence, timestamp) = match stored.logs.last() {
            Some(last) => (last.sequence + 1, entry.timestamp.max(last.timestamp)),
            None => (1, entry.timestamp),
        };
        let entry = LogEntry {
            job_id: id,
            sequence,
            timestamp,
            level: entry.level,
            message: entry.message,
            source: entry.source,
        };
        stored.logs.push(entry.clone());
        Ok(entry)
    }

    async fn logs(&self, id: JobId, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError> {
        let jobs = self.jobs.lock();
        let stored = jobs.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(stored
            .logs
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<ImportJob>, StoreError> {
        let jobs = self.jobs.lock();
        let mut matching: Vec<ImportJob> = jobs
            .values()
            .map(|stored| &stored.job)
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<DeletedCounts, StoreError> {
        let mut jobs = self.jobs.lock();
        let mut counts = DeletedCounts::default();
        jobs.retain(|_, stored| {
            let expired = stored.job.created_at < cutoff;
            if expired {
                counts.jobs += 1;
                counts.logs += stored.logs.len() as u64;
            }
            !expired
        });
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogLevel;
    use chrono::Duration;
    use serde_json::json;

    fn job(site: &str) -> ImportJob {
        ImportJob::new(site, JobMode::Check, json!({"inventory": {"name": "nb"}}))
    }

    #[tokio::test]
    async fn test_transition_stamps_started_once() {
        let store = InMemoryJobStore::new();
        let created = store.create(job("hq")).await.unwrap();
        let t1 = created.created_at + Duration::seconds(1);

        let running = store
            .transition(created.id, JobStatus::Running, t1)
            .await
            .unwrap();
        assert_eq!(running.started_at, Some(t1));

        let err = store
            .transition(created.id, JobStatus::Running, t1 + Duration::seconds(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let done = store
            .transition(created.id, JobStatus::Completed, t1 + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(done.started_at, Some(t1));
        assert!(done.success());
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_state_is_immutable() {
        let store = InMemoryJobStore::new();
        let created = store.create(job("hq")).await.unwrap();
        store
            .transition(created.id, JobStatus::Failed, Utc::now())
            .await
            .unwrap();

        for next in JobStatus::ALL {
            assert!(
                store
                    .transition(created.id, next, Utc::now())
                    .await
                    .is_err()
            );
        }
        let failed = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.started_at.is_none());
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_timestamps_are_clamped_to_creation() {
        let store = InMemoryJobStore::new();
        let created = store.create(job("hq")).await.unwrap();
        let before = created.created_at - Duration::seconds(30);

        let running = store
            .transition(created.id, JobStatus::Running, before)
            .await
            .unwrap();
        assert_eq!(running.started_at, Some(created.created_at));
    }

    #[tokio::test]
    async fn test_append_log_is_monotonic() {
        let store = InMemoryJobStore::new();
        let created = store.create(job("hq")).await.unwrap();

        let mut late = NewLogEntry::new(LogLevel::Info, "first", "network_importer");
        late.timestamp = Utc::now() + Duration::seconds(10);
        store.append_log(created.id, late).await.unwrap();
        let second = store
            .append_log(
                created.id,
                NewLogEntry::new(LogLevel::Error, "second", "network_importer"),
            )
            .await
            .unwrap();

        assert_eq!(second.sequence, 2);
        let logs = store
            .logs(created.id, &LogFilter::default())
            .await
            .unwrap();
        assert!(logs[0].timestamp <= logs[1].timestamp);
        assert!(store.has_errors(created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_log_unknown_job() {
        let store = InMemoryJobStore::new();
        let err = store
            .append_log(JobId::new(), NewLogEntry::new(LogLevel::Info, "x", "y"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_summary_counts_errors() {
        let store = InMemoryJobStore::new();
        let created = store.create(job("hq")).await.unwrap();
        for level in [LogLevel::Info, LogLevel::Warning, LogLevel::Critical] {
            store
                .append_log(created.id, NewLogEntry::new(level, "line", "test"))
                .await
                .unwrap();
        }

        let summary = store.summary(created.id).await.unwrap();
        assert_eq!(summary.logs_count, 3);
        assert_eq!(summary.error_logs_count, 1);
        assert!(summary.has_errors);
        assert!(!summary.success);
    }

    #[tokio::test]
    async fn test_list_filters_newest_first() {
        let store = InMemoryJobStore::new();
        let mut old = job("hq");
        old.created_at -= Duration::minutes(5);
        store.create(old).await.unwrap();
        store.create(job("hq")).await.unwrap();
        store.create(job("branch")).await.unwrap();

        let filter = JobFilter {
            site_code: Some("hq".into()),
            ..Default::default()
        };
        let listed = store.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at > listed[1].created_at);
    }

    #[tokio::test]
    async fn test_delete_created_before() {
        let store = InMemoryJobStore::new();
        let mut old = job("hq");
        old.created_at -= Duration::days(40);
        let old = store.create(old).await.unwrap();
        store
            .append_log(old.id, NewLogEntry::new(LogLevel::Info, "x", "y"))
            .await
            .unwrap();
        store.create(job("hq")).await.unwrap();

        let counts = store
            .delete_created_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(counts, DeletedCounts { jobs: 1, logs: 1 });
        assert_eq!(store.len(), 1);
    }
}
