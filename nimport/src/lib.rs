//! nimport - Orchestration of network import jobs.
//!
//! Each job imports one site from an inventory system into a network
//! model. The crate owns everything around the import itself: it records
//! jobs, resolves their configuration with injected credentials, runs them
//! inline or through a worker queue, retries failures and captures the
//! engine's log output per job.
//!
//! # Core Concepts
//!
//! - **Job**: An [`ImportJob`] moves through `pending`, `queued`, `running`
//!   and ends `completed` or `failed`. [`JobStore`] persists jobs and logs.
//!
//! - **Resolution**: [`ConfigResolver`] merges defaults, the user's settings
//!   and credentials from a [`CredentialStore`] into a [`ResolvedConfig`].
//!
//! - **Dispatch**: [`ExecutionDispatcher`] asks a [`WorkerAvailabilityProbe`]
//!   whether workers are live, then either enqueues the job on a
//!   [`TaskQueue`] or executes it immediately.
//!
//! - **Capture**: [`LogSink`] records `tracing` events from the engine's
//!   channels into the job's log for the duration of one execution.
//!
//! - **Runtime**: [`WorkerPool`] drains the local queue, built together with
//!   the dispatcher by [`DispatcherBuilder::build_local`].
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL job store via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use nimport::*;
//!
//! let runtime = DispatcherBuilder::default()
//!     .with_store(Arc::new(InMemoryJobStore::new()))
//!     .with_credentials(credentials)
//!     .with_engine_factory(engines)
//!     .with_channel_table(table)
//!     .build_local(WorkerConfig::new(2))?;
//! runtime.pool.spawn().await;
//!
//! let service = ImportService::new(runtime.dispatcher.clone());
//! let response = service
//!     .execute(ImportRequest::new("hq-01", JobMode::Check, settings))
//!     .await?;
//! ```

/// Per-job capture of engine log output.
pub mod capture;

/// Orchestrator settings loaded from defaults and `NIMPORT_*` variables.
pub mod config;

/// Named credential records and the secrets behind them.
pub mod credentials;

/// Sync-or-queued execution of jobs with retries.
///
/// The `dispatcher` module provides [`ExecutionDispatcher`] together with the
/// result types it reports: [`DispatchOutcome`], [`ExecutionResult`] and
/// [`TaskOutcome`].
pub mod dispatcher;

/// The import engine boundary.
pub mod engine;

/// Job lifecycle events.
///
/// The `events` module provides [`JobEventPublisher`] and
/// [`JobEventStream`] with the in-process [`InProcEventBus`].
pub mod events;

/// Jobs, identifiers and the status state machine.
pub mod job;

/// Log levels and entries.
pub mod logs;

#[cfg(feature = "metrics")]
/// Prometheus metrics for job throughput and duration.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides a PostgreSQL-backed [`JobStore`]
/// when the `postgres` feature is enabled.
pub mod persistence;

/// Execution tasks and the queue that carries them to workers.
pub mod queue;

/// Validation of incoming import requests.
pub mod request;

/// Configuration resolution and credential injection.
pub mod resolver;

/// Removal of old jobs.
pub mod retention;

/// Retry limits and exponential backoff.
pub mod retry;

/// Runtime orchestration and worker management.
///
/// Includes:
/// - [`WorkerPool`] - local workers draining the task queue
/// - [`ShutdownToken`] - graceful shutdown signaling
/// - [`WorkerConfig`] - worker pool configuration
/// - [`DispatcherBuilder`] - wiring of the dispatcher and local runtime
pub mod runtime;

/// Submission and status reporting for clients.
pub mod service;

/// Job persistence.
pub mod store;

/// Spans and recording helpers for tracing.
pub mod telemetry;

/// Worker availability.
pub mod workers;

pub use capture::{
    CaptureConfig, CaptureGuard, CaptureLayer, ChannelTable, EXECUTION_TARGET, LogSink,
};
pub use config::{DEFAULT_RETENTION_DAYS, OrchestratorConfig, PersistenceConfig};
pub use credentials::{
    BatfishService, CredentialError, CredentialKind, CredentialStore, EnvSecrets,
    InventoryCredentials, InventorySetting, MapSecrets, NetworkCredentialRef, NetworkCredentials,
    RegistryCredentialStore, SecretSource,
};
pub use dispatcher::{
    DispatchError, DispatchOutcome, ExecutionDispatcher, ExecutionFailure, ExecutionResult,
    FailureKind, TaskOutcome,
};
pub use engine::{
    DiffResult, EngineError, EngineFactory, ExecutionReport, ImportEngine, InventoryFilter,
    SyncSummary, run_mode,
};
pub use events::{InProcEventBus, JobEvent, JobEventPayload, JobEventPublisher, JobEventStream};
pub use job::{ImportJob, JobId, JobMode, JobStatus, JobSummary, TaskId};
pub use logs::{LogEntry, LogFilter, LogLevel, NewLogEntry};
pub use queue::{ExecutionTask, LocalTaskQueue, QueueError, TaskQueue, TaskReceiver};
pub use request::{ImportRequest, RequestError, ValidatedRequest};
pub use resolver::{ConfigError, ConfigResolver, ResolvedConfig};
pub use retention::{RetentionReport, cleanup_old_jobs};
pub use retry::RetryPolicy;
pub use runtime::{DispatcherBuilder, LocalRuntime, ShutdownToken, WorkerConfig, WorkerPool};
pub use service::{ImportService, JobStatusReport, ServiceError, SubmitResponse};
pub use store::{DeletedCounts, InMemoryJobStore, JobFilter, JobStore, StoreError};
pub use workers::{StaticWorkerProbe, WorkerAvailabilityProbe, WorkerGauge};
