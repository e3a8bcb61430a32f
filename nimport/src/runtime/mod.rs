/// Builders for dispatchers and local runtimes.
pub mod builder;
/// Worker pool and graceful shutdown.
pub mod supervisor;
/// Worker pool configuration.
pub mod worker;

pub use builder::{DispatcherBuilder, LocalRuntime};
pub use supervisor::{ShutdownToken, WorkerPool};
pub use worker::WorkerConfig;
