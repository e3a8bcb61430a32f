use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use nimport::*;
use parking_lot::Mutex;
use serde_json::Value;

/// Engine operation a scripted failure is raised from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailStage {
    Setup,
    Inventory,
    Diff,
    Sync,
}

#[derive(Clone, Debug)]
struct Failure {
    stage: FailStage,
    message: String,
    /// Runs that fail before the engine starts succeeding.
    times: u32,
    /// Panic instead of returning an error.
    panics: bool,
}

/// An engine instance handed out by [`ScriptedEngineFactory`].
#[derive(Clone, Debug)]
pub struct CreatedEngine {
    pub site_code: String,
    pub mode: JobMode,
    /// The resolved configuration, secrets included.
    pub config: Value,
}

#[derive(Debug, Default)]
struct Calls {
    created: Mutex<Vec<CreatedEngine>>,
    runs: AtomicU32,
    syncs: AtomicUsize,
}

/// Engine factory whose engines follow a fixed script and log on the
/// `network_importer` channels like the real engine.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEngineFactory {
    diff: Option<DiffResult>,
    rejected: usize,
    failure: Option<Failure>,
    calls: Arc<Calls>,
}

impl ScriptedEngineFactory {
    /// Engines that find no differences.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines that report `changes` differences described by `summary`.
    pub fn with_diff(mut self, summary: impl Into<String>, changes: usize) -> Self {
        self.diff = Some(DiffResult::new(summary, changes));
        self
    }

    /// Every run fails at `stage`.
    pub fn failing(self, stage: FailStage, message: impl Into<String>) -> Self {
        self.failing_times(u32::MAX, stage, message)
    }

    /// The first `times` runs fail at `stage`, later runs succeed.
    pub fn failing_times(mut self, times: u32, stage: FailStage, message: impl Into<String>) -> Self {
        self.failure = Some(Failure {
            stage,
            message: message.into(),
            times,
            panics: false,
        });
        self
    }

    /// The first `times` runs panic at `stage`, later runs succeed.
    pub fn panicking_times(mut self, times: u32, stage: FailStage, message: impl Into<String>) -> Self {
        self.failure = Some(Failure {
            stage,
            message: message.into(),
            times,
            panics: true,
        });
        self
    }

    /// `sync` reports `rejected` of the diff's changes as not applied.
    pub fn rejecting(mut self, rejected: usize) -> Self {
        self.rejected = rejected;
        self
    }

    pub fn created(&self) -> Vec<CreatedEngine> {
        self.calls.created.lock().clone()
    }

    pub fn create_count(&self) -> usize {
        self.calls.created.lock().len()
    }

    pub fn sync_count(&self) -> usize {
        self.calls.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn create(
        &self,
        config: &ResolvedConfig,
        mode: JobMode,
    ) -> Result<Box<dyn ImportEngine>, EngineError> {
        let run = self.calls.runs.fetch_add(1, Ordering::SeqCst);
        self.calls.created.lock().push(CreatedEngine {
            site_code: config.site_code().to_string(),
            mode,
            config: config.to_value(),
        });

        let failure = self
            .failure
            .as_ref()
            .filter(|failure| run < failure.times)
            .cloned();

        if let Some(failure) = failure.as_ref().filter(|f| f.stage == FailStage::Setup) {
            if failure.panics {
                panic!("{}", failure.message);
            }
            tracing::error!(target: "network_importer::main", "Unable to initialize the importer: {}", failure.message);
            return Err(EngineError::Setup(failure.message.clone()));
        }
        tracing::debug!(target: "network_importer::config", site = config.site_code(), "Configuration loaded");

        Ok(Box::new(ScriptedEngine {
            diff: self.diff.clone(),
            rejected: self.rejected,
            failure,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct ScriptedEngine {
    diff: Option<DiffResult>,
    rejected: usize,
    failure: Option<Failure>,
    calls: Arc<Calls>,
}

impl ScriptedEngine {
    fn check(&self, stage: FailStage) -> Option<String> {
        match &self.failure {
            Some(failure) if failure.stage == stage => {
                if failure.panics {
                    panic!("{}", failure.message);
                }
                tracing::error!(target: "network_importer::core", ?stage, "{}", failure.message);
                Some(failure.message.clone())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ImportEngine for ScriptedEngine {
    async fn build_inventory(&mut self, filter: &InventoryFilter) -> Result<(), EngineError> {
        tracing::info!(target: "network_importer::adapters", site = ?filter.site, "Building inventory");
        match self.check(FailStage::Inventory) {
            Some(message) => Err(EngineError::Inventory(message)),
            None => Ok(()),
        }
    }

    async fn diff(&mut self) -> Result<Option<DiffResult>, EngineError> {
        tracing::info!(target: "network_importer::core", "Comparing network with inventory");
        if let Some(message) = self.check(FailStage::Diff) {
            return Err(EngineError::Diff(message));
        }
        Ok(self.diff.clone())
    }

    async fn sync(&mut self) -> Result<SyncSummary, EngineError> {
        tracing::info!(target: "network_importer::core", "Pushing changes to the inventory");
        if let Some(message) = self.check(FailStage::Sync) {
            return Err(EngineError::Sync(message));
        }
        self.calls.syncs.fetch_add(1, Ordering::SeqCst);

        let changes = self.diff.as_ref().map_or(0, |diff| diff.changes);
        let failed = self.rejected.min(changes);
        if failed > 0 {
            tracing::warn!(target: "network_importer::core", failed, "Inventory rejected changes");
        }
        Ok(SyncSummary {
            applied: changes - failed,
            failed,
        })
    }
}
