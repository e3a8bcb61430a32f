//! Boundary to the network import engine.
//!
//! The engine discovers devices, compares them with the inventory and
//! optionally pushes the differences. Its internals are opaque here; the
//! orchestrator only drives the four operations of [`ImportEngine`] in a
//! fixed order and reads the outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::EXECUTION_TARGET;
use crate::job::JobMode;
use crate::resolver::ResolvedConfig;

/// Tracing target the engine logs under. Captured per job.
pub const ENGINE_TARGET: &str = "network_importer";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("inventory build failed: {0}")]
    Inventory(String),
    #[error("diff failed: {0}")]
    Diff(String),
    #[error("sync failed: {0}")]
    Sync(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Scope of an inventory build.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InventoryFilter {
    pub site: Option<String>,
    pub limit: Option<String>,
}

impl InventoryFilter {
    pub fn site(site: impl Into<String>) -> Self {
        Self {
            site: Some(site.into()),
            limit: None,
        }
    }
}

/// Differences between the network and the inventory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiffResult {
    /// Human readable rendering of the differences.
    pub summary: String,
    /// Number of objects that would be created, updated or deleted.
    pub changes: usize,
}

impl DiffResult {
    pub fn new(summary: impl Into<String>, changes: usize) -> Self {
        Self {
            summary: summary.into(),
            changes,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.changes > 0
    }
}

/// What a `sync` pushed to the inventory.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub applied: usize,
    /// Changes the inventory rejected. Any rejection fails the job.
    pub failed: usize,
}

impl SyncSummary {
    pub fn applied(applied: usize) -> Self {
        Self { applied, failed: 0 }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn total(&self) -> usize {
        self.applied + self.failed
    }
}

/// The import engine, one instance per execution.
#[async_trait]
pub trait ImportEngine: Send {
    async fn build_inventory(&mut self, filter: &InventoryFilter) -> Result<(), EngineError>;

    /// Prepare the engine for `diff`. Builds the inventory by default.
    async fn init(&mut self, filter: &InventoryFilter) -> Result<(), EngineError> {
        self.build_inventory(filter).await
    }

    /// `None` or an empty result means the network matches the inventory.
    async fn diff(&mut self) -> Result<Option<DiffResult>, EngineError>;

    /// Push the pending differences to the inventory. Rejected changes are
    /// reported in the summary rather than as an error.
    async fn sync(&mut self) -> Result<SyncSummary, EngineError>;
}

/// Creates engines from resolved configuration.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: &ResolvedConfig,
        mode: JobMode,
    ) -> Result<Box<dyn ImportEngine>, EngineError>;
}

/// What an engine run produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// False when the engine finished but reported rejected changes.
    pub success: bool,
    pub mode: JobMode,
    /// Diff summary, or `"No differences found"`.
    pub diff: String,
    pub changes_detected: bool,
    /// Only meaningful in apply mode.
    pub changes_applied: bool,
    pub sync: Option<SyncSummary>,
}

impl ExecutionReport {
    /// Describes why an unsuccessful run failed.
    pub fn failure_message(&self) -> Option<String> {
        match self.sync {
            Some(sync) if !sync.success() => Some(format!(
                "{} of {} changes could not be applied",
                sync.failed,
                sync.total()
            )),
            _ => None,
        }
    }
}

pub const NO_DIFFERENCES: &str = "No differences found";

/// Drive an engine through one run: `init`, `diff`, and in apply mode
/// `sync` when there are changes.
pub async fn run_mode(
    engine: &mut dyn ImportEngine,
    mode: JobMode,
    filter: &InventoryFilter,
) -> Result<ExecutionReport, EngineError> {
    match mode {
        JobMode::Check => {
            tracing::info!(target: EXECUTION_TARGET, "Executing network check (diff calculation)...")
        }
        JobMode::Apply => tracing::info!(
            target: EXECUTION_TARGET,
            "Executing network apply (diff calculation + sync)..."
        ),
    }

    engine.init(filter).await?;
    let diff = engine.diff().await?.filter(DiffResult::has_changes);
    let changes_detected = diff.is_some();
    let summary = diff
        .map(|diff| diff.summary)
        .unwrap_or_else(|| NO_DIFFERENCES.to_string());

    let sync = match mode {
        JobMode::Check => {
            tracing::info!(target: EXECUTION_TARGET, "Check mode completed - differences calculated");
            None
        }
        JobMode::Apply if changes_detected => {
            tracing::info!(target: EXECUTION_TARGET, "Changes detected:\n{summary}");
            let sync = engine.sync().await?;
            if sync.success() {
                tracing::info!(target: EXECUTION_TARGET, "Changes applied successfully");
            } else {
                tracing::error!(
                    target: EXECUTION_TARGET,
                    "{} of {} changes were rejected by the inventory",
                    sync.failed,
                    sync.total()
                );
            }
            Some(sync)
        }
        JobMode::Apply => {
            tracing::info!(target: EXECUTION_TARGET, "No changes to apply");
            None
        }
    };

    Ok(ExecutionReport {
        success: sync.is_none_or(|sync| sync.success()),
        mode,
        diff: summary,
        changes_detected,
        changes_applied: sync.is_some_and(|sync| sync.applied > 0),
        sync,
    })
}
