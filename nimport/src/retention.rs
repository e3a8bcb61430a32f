use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{JobStore, StoreError};

/// Result of a retention sweep.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetentionReport {
    pub jobs_deleted: u64,
    pub logs_deleted: u64,
    pub cutoff: DateTime<Utc>,
}

/// Delete jobs created more than `days_old` days ago, with their logs.
pub async fn cleanup_old_jobs(
    store: &dyn JobStore,
    days_old: u32,
) -> Result<RetentionReport, StoreError> {
    cleanup_before(store, Utc::now() - Duration::days(i64::from(days_old))).await
}

/// Delete jobs created before `cutoff`, with their logs.
pub async fn cleanup_before(
    store: &dyn JobStore,
    cutoff: DateTime<Utc>,
) -> Result<RetentionReport, StoreError> {
    let deleted = store.delete_created_before(cutoff).await?;
    tracing::info!(
        jobs_deleted = deleted.jobs,
        logs_deleted = deleted.logs,
        %cutoff,
        "retention cleanup finished"
    );
    Ok(RetentionReport {
        jobs_deleted: deleted.jobs,
        logs_deleted: deleted.logs,
        cutoff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ImportJob, JobMode};
    use crate::logs::{LogLevel, NewLogEntry};
    use crate::store::InMemoryJobStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_removes_only_old_jobs_and_their_logs() {
        let store = InMemoryJobStore::new();

        let mut old = ImportJob::new("old-site", JobMode::Check, json!({}));
        old.created_at = Utc::now() - Duration::days(45);
        let old = store.create(old).await.unwrap();
        for message in ["a", "b"] {
            store
                .append_log(old.id, NewLogEntry::new(LogLevel::Info, message, "test"))
                .await
                .unwrap();
        }

        let fresh = store
            .create(ImportJob::new("new-site", JobMode::Check, json!({})))
            .await
            .unwrap();
        store
            .append_log(fresh.id, NewLogEntry::new(LogLevel::Info, "kept", "test"))
            .await
            .unwrap();

        let report = cleanup_old_jobs(&store, 30).await.unwrap();
        assert_eq!(report.jobs_deleted, 1);
        assert_eq!(report.logs_deleted, 2);
        assert!(store.get(old.id).await.unwrap().is_none());
        assert!(store.get(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemoryJobStore::new();
        let report = cleanup_old_jobs(&store, 30).await.unwrap();
        assert_eq!(report.jobs_deleted, 0);
        assert_eq!(report.logs_deleted, 0);
    }
}
