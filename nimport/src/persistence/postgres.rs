use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::job::{ImportJob, JobId, JobMode, JobStatus, TaskId};
use crate::logs::{LogEntry, LogFilter, LogLevel, NewLogEntry};
use crate::store::{DeletedCounts, JobFilter, JobStore, StoreError, apply_transition};

/// Tables used by [`PostgresJobStore`]. Applied by
/// [`PostgresJobStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nimport_jobs (
    id UUID PRIMARY KEY,
    site_code VARCHAR(50) NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    config_data JSONB NOT NULL,
    task_ref TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS nimport_jobs_created_at_idx ON nimport_jobs (created_at DESC);
CREATE INDEX IF NOT EXISTS nimport_jobs_site_status_idx ON nimport_jobs (site_code, status);

CREATE TABLE IF NOT EXISTS nimport_job_logs (
    job_id UUID NOT NULL REFERENCES nimport_jobs (id) ON DELETE CASCADE,
    sequence BIGINT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    source TEXT NOT NULL,
    PRIMARY KEY (job_id, sequence)
);
"#;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

/// PostgreSQL-backed [`JobStore`].
///
/// Transitions and log appends lock the job row (`SELECT ... FOR UPDATE`)
/// so concurrent writers for one job are serialized by the database.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized from `config`.
    pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.connection_string)
            .await?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the job and log tables when missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_job(row: &PgRow) -> anyhow::Result<ImportJob> {
        let mode: String = row.try_get("mode")?;
        let status: String = row.try_get("status")?;
        let task_ref: Option<String> = row.try_get("task_ref")?;

        Ok(ImportJob {
            id: JobId(row.try_get::<Uuid, _>("id")?),
            site_code: row.try_get("site_code")?,
            mode: mode.parse::<JobMode>().map_err(anyhow::Error::msg)?,
            status: status.parse::<JobStatus>().map_err(anyhow::Error::msg)?,
            config_data: row.try_get("config_data")?,
            task_ref: task_ref.map(TaskId),
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_log(row: &PgRow) -> anyhow::Result<LogEntry> {
        let level: String = row.try_get("level")?;
        let sequence: i64 = row.try_get("sequence")?;

        Ok(LogEntry {
            job_id: JobId(row.try_get::<Uuid, _>("job_id")?),
            sequence: u64::try_from(sequence)?,
            timestamp: row.try_get("timestamp")?,
            level: level.parse::<LogLevel>().map_err(anyhow::Error::msg)?,
            message: row.try_get("message")?,
            source: row.try_get("source")?,
        })
    }
}

const JOB_COLUMNS: &str =
    "id, site_code, mode, status, config_data, task_ref, created_at, started_at, completed_at";

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: ImportJob) -> Result<ImportJob, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO nimport_jobs
                (id, site_code, mode, status, config_data, task_ref, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.0)
        .bind(&job.site_code)
        .bind(job.mode.as_str())
        .bind(job.status.as_str())
        .bind(&job.config_data)
        .bind(job.task_ref.as_ref().map(TaskId::as_str))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, site_code = %job.site_code, "job row inserted");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<ImportJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM nimport_jobs WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(Self::row_to_job)
            .transpose()
            .map_err(StoreError::Backend)
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<ImportJob, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM nimport_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(id));
        };
        let mut job = Self::row_to_job(&row)?;
        let from = job.status;

        if let Err(err) = apply_transition(&mut job, to, at) {
            warn!(job_id = %id, from = %from, to = %to, "rejected job transition");
            return Err(err);
        }

        let updated = sqlx::query(
            r#"
            UPDATE nimport_jobs
            SET status = $2, started_at = $3, completed_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(id.0)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition { job_id: id, from, to });
        }
        tx.commit().await?;
        Ok(job)
    }

    async fn set_task_ref(&self, id: JobId, task: TaskId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE nimport_jobs SET task_ref = $2 WHERE id = $1")
            .bind(id.0)
            .bind(task.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn append_log(&self, id: JobId, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM nimport_jobs WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id));
        }

        let last = sqlx::query(
            r#"
            SELECT sequence, timestamp FROM nimport_job_logs
            WHERE job_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let (sequence, timestamp) = match last {
            Some(row) => {
                let sequence: i64 = row.try_get("sequence")?;
                let previous: DateTime<Utc> = row.try_get("timestamp")?;
                (sequence + 1, entry.timestamp.max(previous))
            }
            None => (1, entry.timestamp),
        };

        sqlx::query(
            r#"
            INSERT INTO nimport_job_logs (job_id, sequence, timestamp, level, message, source)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id.0)
        .bind(sequence)
        .bind(timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.source)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LogEntry {
            job_id: id,
            sequence: u64::try_from(sequence).map_err(anyhow::Error::from)?,
            timestamp,
            level: entry.level,
            message: entry.message,
            source: entry.source,
        })
    }

    async fn logs(&self, id: JobId, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError> {
        if self.get(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }

        let rows = sqlx::query(
            r#"
            SELECT job_id, sequence, timestamp, level, message, source
            FROM nimport_job_logs
            WHERE job_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::row_to_log(row)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<ImportJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM nimport_jobs
            WHERE ($1::text IS NULL OR site_code = $1)
              AND ($2::text IS NULL OR mode = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.site_code.as_deref())
        .bind(filter.mode.map(|mode| mode.as_str()))
        .bind(filter.status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::row_to_job)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(StoreError::Backend)
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<DeletedCounts, StoreError> {
        let mut tx = self.pool.begin().await?;

        let logs = sqlx::query(
            r#"
            DELETE FROM nimport_job_logs
            WHERE job_id IN (SELECT id FROM nimport_jobs WHERE created_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let jobs = sqlx::query("DELETE FROM nimport_jobs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            jobs = jobs.rows_affected(),
            logs = logs.rows_affected(),
            %cutoff,
            "deleted expired job rows"
        );
        Ok(DeletedCounts {
            jobs: jobs.rows_affected(),
            logs: logs.rows_affected(),
        })
    }
}
