use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::Instrument;

use crate::dispatcher::{ExecutionDispatcher, TaskOutcome};
use crate::queue::TaskReceiver;
use crate::telemetry;
use crate::workers::{PoolWorkerProbe, WorkerGauge};

use super::worker::WorkerConfig;

/// Token for signaling graceful shutdown to workers.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        // Register before checking the flag so a concurrent cancel is not missed.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Background workers executing queued import tasks.
///
/// Each worker takes one task at a time from the shared receiver and hands
/// it to [`ExecutionDispatcher::handle_task`]. Live workers are counted on
/// the pool's [`WorkerGauge`], which backs the dispatcher's probe.
pub struct WorkerPool {
    config: WorkerConfig,
    dispatcher: Arc<ExecutionDispatcher>,
    receiver: TaskReceiver,
    gauge: WorkerGauge,
    shutdown_token: ShutdownToken,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("worker_count", &worker_count)
            .field("live_workers", &self.gauge.get())
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        dispatcher: Arc<ExecutionDispatcher>,
        receiver: TaskReceiver,
        gauge: WorkerGauge,
    ) -> Self {
        Self {
            config,
            dispatcher,
            receiver,
            gauge,
            shutdown_token: ShutdownToken::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<ExecutionDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Probe reporting this pool's live workers.
    pub fn probe(&self) -> PoolWorkerProbe {
        self.gauge.probe()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Spawn `config.count` workers.
    pub async fn spawn(&self) {
        for index in 0..self.config.count {
            let worker_id = self.config.worker_id(index);
            let dispatcher = Arc::clone(&self.dispatcher);
            let receiver = self.receiver.clone();
            let shutdown = self.shutdown_token.clone();
            // Counted before the task runs so submissions right after
            // spawn already see the worker.
            let slot = self.gauge.enter();

            let handle = tokio::spawn(async move {
                let _slot = slot;
                Self::worker_loop(worker_id, dispatcher, receiver, shutdown).await;
            });

            let mut handles = self.worker_handles.lock().await;
            handles.push(handle);
        }
        tracing::info!(workers = self.config.count, "worker pool spawned");
    }

    /// Stop taking tasks and wait for running executions to finish.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Initiating graceful shutdown of worker pool");

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(
                tokio::time::Duration::from_secs(self.config.shutdown_timeout_secs),
                handle,
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Worker task failed: {:?}", e),
                Err(_) => {
                    tracing::warn!("Worker task timed out during shutdown")
                }
            }
        }

        tracing::info!("Worker pool shutdown complete");
        Ok(())
    }

    async fn worker_loop(
        worker_id: String,
        dispatcher: Arc<ExecutionDispatcher>,
        receiver: TaskReceiver,
        shutdown: ShutdownToken,
    ) {
        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Worker {} shutting down", worker_id);
                    break;
                }
                task = receiver.recv() => task,
            };

            let Some(task) = task else {
                tracing::info!("Worker {} stopping, task queue closed", worker_id);
                break;
            };

            let span = telemetry::worker_task_span(&worker_id, task.task_id.as_str());
            let job_id = task.job_id;
            match dispatcher.handle_task(task).instrument(span).await {
                TaskOutcome::Finished(result) => {
                    tracing::debug!(
                        %job_id,
                        success = result.success(),
                        "worker {worker_id} finished task"
                    );
                }
                TaskOutcome::RetryScheduled {
                    next_attempt,
                    delay,
                } => {
                    tracing::debug!(
                        %job_id,
                        next_attempt,
                        delay_secs = delay.as_secs(),
                        "worker {worker_id} scheduled retry"
                    );
                }
            }
        }
    }
}
