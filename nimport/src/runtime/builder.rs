use std::fmt;
use std::sync::Arc;

use crate::capture::{ChannelTable, LogSink};
use crate::credentials::CredentialStore;
use crate::dispatcher::ExecutionDispatcher;
use crate::engine::EngineFactory;
use crate::events::{InProcEventBus, JobEventPublisher};
use crate::queue::{LocalTaskQueue, TaskQueue};
use crate::resolver::ConfigResolver;
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use crate::workers::{WorkerAvailabilityProbe, WorkerGauge};

use super::supervisor::WorkerPool;
use super::worker::WorkerConfig;

/// Builder for an [`ExecutionDispatcher`] with explicit dependencies.
///
/// # Example
///
/// ```ignore
/// let dispatcher = DispatcherBuilder::new()
///     .with_store(store)
///     .with_credentials(credentials)
///     .with_engine_factory(engines)
///     .with_channel_table(table)
///     .with_probe(probe)
///     .with_queue(queue)
///     .build()?;
/// ```
#[derive(Default)]
pub struct DispatcherBuilder {
    store: Option<Arc<dyn JobStore>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    engines: Option<Arc<dyn EngineFactory>>,
    channel_table: Option<Arc<ChannelTable>>,
    probe: Option<Arc<dyn WorkerAvailabilityProbe>>,
    queue: Option<Arc<dyn TaskQueue>>,
    events: Option<Arc<dyn JobEventPublisher>>,
    retry: RetryPolicy,
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("store_set", &self.store.is_some())
            .field("credentials_set", &self.credentials.is_some())
            .field("engines_set", &self.engines.is_some())
            .field("channel_table_set", &self.channel_table.is_some())
            .field("probe_set", &self.probe.is_some())
            .field("queue_set", &self.queue.is_some())
            .field("events_set", &self.events.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_engine_factory(mut self, engines: Arc<dyn EngineFactory>) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Channel table shared with the subscriber's capture layer.
    pub fn with_channel_table(mut self, table: Arc<ChannelTable>) -> Self {
        self.channel_table = Some(table);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn WorkerAvailabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Defaults to a fresh [`InProcEventBus`].
    pub fn with_events(mut self, events: Arc<dyn JobEventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// # Errors
    ///
    /// Returns an error if any required dependency is missing.
    pub fn build(self) -> anyhow::Result<ExecutionDispatcher> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let credentials = self
            .credentials
            .ok_or_else(|| anyhow::anyhow!("credentials dependency missing"))?;
        let engines = self
            .engines
            .ok_or_else(|| anyhow::anyhow!("engine_factory dependency missing"))?;
        let table = self
            .channel_table
            .ok_or_else(|| anyhow::anyhow!("channel_table dependency missing"))?;
        let probe = self
            .probe
            .ok_or_else(|| anyhow::anyhow!("probe dependency missing"))?;
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue dependency missing"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InProcEventBus::default()));

        let sink = LogSink::new(table, Arc::clone(&store));
        Ok(ExecutionDispatcher::new(
            store,
            ConfigResolver::new(credentials),
            engines,
            probe,
            queue,
            sink,
            events,
            self.retry,
        ))
    }

    /// Build a dispatcher wired to an in-process queue and worker pool.
    ///
    /// Probe and queue set on the builder are replaced by the pool's.
    /// Workers are not running until [`WorkerPool::spawn`].
    pub fn build_local(mut self, workers: WorkerConfig) -> anyhow::Result<LocalRuntime> {
        let (queue, receiver) = LocalTaskQueue::new(workers.queue_capacity);
        let gauge = WorkerGauge::new();
        self.probe = Some(Arc::new(gauge.probe()));
        self.queue = Some(Arc::new(queue.clone()));

        let dispatcher = Arc::new(self.build()?);
        let pool = WorkerPool::new(workers, Arc::clone(&dispatcher), receiver, gauge);
        Ok(LocalRuntime {
            dispatcher,
            queue,
            pool,
        })
    }
}

/// A dispatcher with its in-process queue and workers.
#[derive(Debug)]
pub struct LocalRuntime {
    pub dispatcher: Arc<ExecutionDispatcher>,
    pub queue: LocalTaskQueue,
    pub pool: WorkerPool,
}
