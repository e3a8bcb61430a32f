use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

/// Reports how many workers can currently take queued executions.
///
/// Asked once per submission; answers must reflect the current state.
#[async_trait]
pub trait WorkerAvailabilityProbe: Send + Sync {
    async fn active_worker_count(&self) -> usize;
}

/// A probe with a fixed answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticWorkerProbe(pub usize);

#[async_trait]
impl WorkerAvailabilityProbe for StaticWorkerProbe {
    async fn active_worker_count(&self) -> usize {
        self.0
    }
}

/// Live worker count shared between a worker pool and its probe.
#[derive(Clone, Debug, Default)]
pub struct WorkerGauge {
    live: Arc<AtomicUsize>,
}

impl WorkerGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Count a worker as live until the returned guard drops.
    pub fn enter(&self) -> WorkerSlot {
        self.live.fetch_add(1, Ordering::SeqCst);
        WorkerSlot {
            live: Arc::clone(&self.live),
        }
    }

    pub fn probe(&self) -> PoolWorkerProbe {
        PoolWorkerProbe {
            gauge: self.clone(),
        }
    }
}

/// Held by a running worker.
#[derive(Debug)]
pub struct WorkerSlot {
    live: Arc<AtomicUsize>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Probe backed by a [`WorkerGauge`].
#[derive(Clone, Debug)]
pub struct PoolWorkerProbe {
    gauge: WorkerGauge,
}

#[async_trait]
impl WorkerAvailabilityProbe for PoolWorkerProbe {
    async fn active_worker_count(&self) -> usize {
        self.gauge.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gauge_tracks_slots() {
        let gauge = WorkerGauge::new();
        let probe = gauge.probe();
        assert_eq!(probe.active_worker_count().await, 0);

        let a = gauge.enter();
        let b = gauge.enter();
        assert_eq!(probe.active_worker_count().await, 2);

        drop(a);
        assert_eq!(probe.active_worker_count().await, 1);
        drop(b);
        assert_eq!(probe.active_worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_static_probe() {
        assert_eq!(StaticWorkerProbe(4).active_worker_count().await, 4);
    }
}
