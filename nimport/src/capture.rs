//! Per-job log capture.
//!
//! The engine logs through `tracing` like everything else in the process.
//! [`CaptureLayer`] sits in the subscriber stack and routes events emitted on
//! a set of named channels (tracing targets) to whichever job currently
//! holds the capture. Each captured event becomes a [`crate::LogEntry`] of
//! that job while the operational log output is left untouched.
//!
//! A channel matches its own target and every target below it on `::`
//! boundaries, so `network_importer::adapters::nautobot` is captured by the
//! `network_importer::adapters` channel. The most specific channel wins.
//!
//! Only one job can hold the capture of a [`ChannelTable`] at a time.
//! [`LogSink::acquire`] waits for the current holder to release.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::job::JobId;
use crate::logs::{LogLevel, NewLogEntry};
use crate::store::JobStore;

/// Target of the orchestrator's own per-job messages.
pub const EXECUTION_TARGET: &str = "nimport::execution";

/// Channels the import engine logs on.
pub const ENGINE_CHANNELS: [&str; 8] = [
    "network_importer",
    "network_importer::core",
    "network_importer::main",
    "network_importer::adapters",
    "network_importer::drivers",
    "network_importer::models",
    "network_importer::config",
    "network_importer::utils",
];

/// Which channels are captured and at what level outside a capture.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub channels: Vec<String>,
    /// Threshold restored on every channel when a capture ends.
    pub idle_threshold: LogLevel,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let mut channels: Vec<String> = ENGINE_CHANNELS.iter().map(|c| c.to_string()).collect();
        channels.push(EXECUTION_TARGET.to_string());
        Self {
            channels,
            idle_threshold: LogLevel::Warning,
        }
    }
}

#[derive(Debug)]
struct Destination {
    id: u64,
    sender: mpsc::UnboundedSender<NewLogEntry>,
}

#[derive(Debug)]
struct Channel {
    threshold: LogLevel,
    destinations: Vec<Destination>,
}

/// What one capture changed on one channel.
#[derive(Debug)]
struct Installed {
    channel: String,
    destination: u64,
    prior_threshold: LogLevel,
}

/// Named channels and their job destinations.
///
/// Shared between the [`CaptureLayer`] in the subscriber and every
/// [`LogSink`] that captures into it.
pub struct ChannelTable {
    channels: RwLock<HashMap<String, Channel>>,
    next_destination: AtomicU64,
    gate: Arc<Mutex<()>>,
}

impl fmt::Debug for ChannelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self.channels.read();
        let mut names: Vec<_> = channels.keys().cloned().collect();
        names.sort();
        f.debug_struct("ChannelTable")
            .field("channels", &names)
            .field("capturing", &self.gate.try_lock().is_err())
            .finish()
    }
}

impl ChannelTable {
    pub fn new(config: &CaptureConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Channel {
                        threshold: config.idle_threshold,
                        destinations: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            channels: RwLock::new(channels),
            next_destination: AtomicU64::new(1),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// The registered channel responsible for `target`, if any.
    pub fn channel_for(&self, target: &str) -> Option<String> {
        let channels = self.channels.read();
        resolve_channel(&channels, target).map(str::to_string)
    }

    /// Current threshold of a registered channel.
    pub fn threshold(&self, channel: &str) -> Option<LogLevel> {
        self.channels.read().get(channel).map(|c| c.threshold)
    }

    /// Number of job destinations installed across all channels.
    pub fn destination_count(&self) -> usize {
        self.channels
            .read()
            .values()
            .map(|c| c.destinations.len())
            .sum()
    }

    fn is_capturing(&self, target: &str) -> bool {
        let channels = self.channels.read();
        resolve_channel(&channels, target)
            .and_then(|name| channels.get(name))
            .is_some_and(|channel| !channel.destinations.is_empty())
    }

    fn dispatch(&self, target: &str, entry: NewLogEntry) {
        let channels = self.channels.read();
        let Some(name) = resolve_channel(&channels, target) else {
            return;
        };
        let Some(channel) = channels.get(name) else {
            return;
        };
        if channel.destinations.is_empty() || entry.level < channel.threshold {
            return;
        }
        for destination in &channel.destinations {
            // A closed receiver means the capture already ended.
            let _ = destination.sender.send(entry.clone());
        }
    }

    fn install(&self, sender: &mpsc::UnboundedSender<NewLogEntry>) -> Vec<Installed> {
        let mut channels = self.channels.write();
        let mut installed = Vec::with_capacity(channels.len());
        for (name, channel) in channels.iter_mut() {
            let id = self.next_destination.fetch_add(1, Ordering::Relaxed);
            installed.push(Installed {
                channel: name.clone(),
                destination: id,
                prior_threshold: channel.threshold,
            });
            channel.destinations.push(Destination {
                id,
                sender: sender.clone(),
            });
            channel.threshold = LogLevel::Debug;
        }
        installed
    }

    fn uninstall(&self, installed: &[Installed]) {
        let mut channels = self.channels.write();
        for item in installed {
            if let Some(channel) = channels.get_mut(&item.channel) {
                channel.destinations.retain(|d| d.id != item.destination);
                channel.threshold = item.prior_threshold;
            }
        }
    }
}

fn resolve_channel<'a>(channels: &'a HashMap<String, Channel>, target: &str) -> Option<&'a str> {
    let mut candidate = target;
    loop {
        if let Some((name, _)) = channels.get_key_value(candidate) {
            return Some(name.as_str());
        }
        candidate = &candidate[..candidate.rfind("::")?];
    }
}

/// `tracing-subscriber` layer feeding a [`ChannelTable`].
#[derive(Clone, Debug)]
pub struct CaptureLayer {
    table: Arc<ChannelTable>,
}

impl CaptureLayer {
    pub fn new(table: Arc<ChannelTable>) -> Self {
        Self { table }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.table.is_capturing(metadata.target()) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = LogLevel::from_tracing(metadata.level(), visitor.critical);
        let entry = NewLogEntry::new(level, visitor.finish(), metadata.target());
        self.table.dispatch(metadata.target(), entry);
    }
}

/// Collects the `message` field plus any other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
    critical: bool,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {}", self.message, fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "critical" {
            self.critical = value;
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Persists captured log lines for one job at a time.
#[derive(Clone)]
pub struct LogSink {
    table: Arc<ChannelTable>,
    store: Arc<dyn JobStore>,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl LogSink {
    pub fn new(table: Arc<ChannelTable>, store: Arc<dyn JobStore>) -> Self {
        Self { table, store }
    }

    pub fn table(&self) -> &Arc<ChannelTable> {
        &self.table
    }

    /// Layer to add to the subscriber so events reach this sink.
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer::new(Arc::clone(&self.table))
    }

    /// Route every channel to `job_id` until the guard is released or
    /// dropped. Waits while another job holds the capture.
    pub async fn acquire(&self, job_id: JobId) -> CaptureGuard {
        let permit = Arc::clone(&self.table.gate).lock_owned().await;

        let (sender, receiver) = mpsc::unbounded_channel();
        let installed = self.table.install(&sender);
        drop(sender);

        let forwarder = tokio::spawn(forward(receiver, Arc::clone(&self.store), job_id));

        CaptureGuard {
            job_id,
            table: Arc::clone(&self.table),
            installed,
            forwarder: Some(forwarder),
            _permit: permit,
        }
    }
}

async fn forward(
    mut receiver: mpsc::UnboundedReceiver<NewLogEntry>,
    store: Arc<dyn JobStore>,
    job_id: JobId,
) {
    while let Some(entry) = receiver.recv().await {
        if let Err(err) = store.append_log(job_id, entry).await {
            tracing::warn!(target: "nimport::capture", %job_id, "failed to persist log entry: {err}");
        }
    }
}

/// An active capture. Dropping it restores the channels; [`release`]
/// additionally waits until every captured line is persisted.
///
/// [`release`]: CaptureGuard::release
pub struct CaptureGuard {
    job_id: JobId,
    table: Arc<ChannelTable>,
    installed: Vec<Installed>,
    forwarder: Option<JoinHandle<()>>,
    _permit: OwnedMutexGuard<()>,
}

impl fmt::Debug for CaptureGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureGuard")
            .field("job_id", &self.job_id)
            .field("channels", &self.installed.len())
            .finish()
    }
}

impl CaptureGuard {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn release(mut self) {
        self.restore();
        if let Some(forwarder) = self.forwarder.take() {
            if let Err(err) = forwarder.await {
                tracing::warn!(target: "nimport::capture", job_id = %self.job_id, "log forwarder failed: {err}");
            }
        }
    }

    fn restore(&mut self) {
        if !self.installed.is_empty() {
            self.table.uninstall(&self.installed);
            self.installed.clear();
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
