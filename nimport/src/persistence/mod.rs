//! PostgreSQL persistence for jobs and their logs.
//!
//! [`PostgresJobStore`] implements [`JobStore`](crate::store::JobStore)
//! on two tables, `nimport_jobs` and `nimport_job_logs`. See [`SCHEMA`].
pub mod postgres;

pub use postgres::{PostgresJobStore, SCHEMA};
