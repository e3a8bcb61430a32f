use serde::{Deserialize, Serialize};

/// Configuration for the local worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers to spawn. Zero disables background execution.
    pub count: usize,
    /// Prefix for worker identifiers (`<prefix>-w<n>`).
    pub id_prefix: String,
    /// Capacity of the local task queue.
    pub queue_capacity: usize,
    /// How long shutdown waits for each worker, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    /// Create a config for `count` workers with default settings.
    pub fn new(count: usize) -> Self {
        Self {
            count,
            ..Default::default()
        }
    }

    /// Set the worker id prefix.
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Set the local queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the per-worker shutdown timeout.
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    pub fn worker_id(&self, index: usize) -> String {
        format!("{}-w{}", self.id_prefix, index)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 0,
            id_prefix: format!("nimport-{}", std::process::id()),
            queue_capacity: 256,
            shutdown_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids() {
        let config = WorkerConfig::new(2).with_id_prefix("import");
        assert_eq!(config.worker_id(0), "import-w0");
        assert_eq!(config.worker_id(1), "import-w1");
        assert_eq!(config.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_builder_overrides_defaults() {
        let config = WorkerConfig::new(4)
            .with_queue_capacity(8)
            .with_shutdown_timeout(5);
        assert_eq!(config.count, 4);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.shutdown_timeout_secs, 5);
        assert!(config.id_prefix.starts_with("nimport-"));
    }
}
