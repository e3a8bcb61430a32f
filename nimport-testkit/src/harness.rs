use std::sync::Arc;

use nimport::*;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

use crate::engine::ScriptedEngineFactory;
use crate::fixtures;
use crate::queue::RecordingQueue;

/// In-memory store, capture table, scripted engines and a recording queue,
/// with a capture layer installed as the thread's default subscriber.
///
/// The subscriber is thread-local, so tests using a harness must run on a
/// current-thread runtime (the `#[tokio::test]` default).
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub table: Arc<ChannelTable>,
    pub engines: ScriptedEngineFactory,
    pub queue: RecordingQueue,
    pub events: Arc<InProcEventBus>,
    credentials: Arc<dyn CredentialStore>,
    _subscriber: DefaultGuard,
}

impl Harness {
    pub fn new(engines: ScriptedEngineFactory) -> Self {
        Self::with_credentials(engines, fixtures::credential_store())
    }

    pub fn with_credentials(
        engines: ScriptedEngineFactory,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let table = Arc::new(ChannelTable::new(&CaptureConfig::default()));
        let subscriber =
            tracing_subscriber::registry().with(CaptureLayer::new(Arc::clone(&table)));

        Self {
            store: Arc::new(InMemoryJobStore::new()),
            table,
            engines,
            queue: RecordingQueue::new(),
            events: Arc::new(InProcEventBus::default()),
            credentials,
            _subscriber: tracing::subscriber::set_default(subscriber),
        }
    }

    /// A builder with every dependency of the harness set and `workers`
    /// reported live.
    pub fn builder(&self, workers: usize) -> DispatcherBuilder {
        DispatcherBuilder::new()
            .with_store(self.store.clone())
            .with_credentials(Arc::clone(&self.credentials))
            .with_engine_factory(Arc::new(self.engines.clone()))
            .with_channel_table(Arc::clone(&self.table))
            .with_probe(Arc::new(StaticWorkerProbe(workers)))
            .with_queue(Arc::new(self.queue.clone()))
            .with_events(self.events.clone())
    }

    pub fn dispatcher(&self, workers: usize) -> ExecutionDispatcher {
        self.dispatcher_with_retry(workers, RetryPolicy::default())
    }

    pub fn dispatcher_with_retry(&self, workers: usize, retry: RetryPolicy) -> ExecutionDispatcher {
        self.builder(workers)
            .with_retry_policy(retry)
            .build()
            .expect("harness provides every dependency")
    }

    /// Store a pending job for the fixture site and settings.
    pub async fn create_job(&self, mode: JobMode) -> ImportJob {
        self.store
            .create(fixtures::job(mode))
            .await
            .expect("in-memory create succeeds")
    }

    pub async fn job(&self, id: JobId) -> ImportJob {
        self.store
            .get(id)
            .await
            .expect("in-memory get succeeds")
            .expect("job exists")
    }

    pub async fn logs(&self, id: JobId) -> Vec<LogEntry> {
        self.store
            .logs(id, &LogFilter::default())
            .await
            .expect("job exists")
    }

    /// Every captured message of a job joined by newlines.
    pub async fn log_text(&self, id: JobId) -> String {
        self.logs(id)
            .await
            .into_iter()
            .map(|entry| entry.message)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
