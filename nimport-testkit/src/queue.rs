use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nimport::*;
use parking_lot::Mutex;

/// A [`TaskQueue`] that keeps every task it is given instead of delivering
/// it. Can be switched to refuse tasks.
#[derive(Clone, Debug, Default)]
pub struct RecordingQueue {
    enqueued: Arc<Mutex<Vec<ExecutionTask>>>,
    delayed: Arc<Mutex<Vec<(ExecutionTask, Duration)>>>,
    refusing: Arc<AtomicBool>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that answers every call with [`QueueError::Closed`].
    pub fn refusing() -> Self {
        let queue = Self::new();
        queue.set_refusing(true);
        queue
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<ExecutionTask> {
        self.enqueued.lock().clone()
    }

    pub fn delayed(&self) -> Vec<(ExecutionTask, Duration)> {
        self.delayed.lock().clone()
    }

    /// Remove and return the oldest delayed task.
    pub fn take_delayed(&self) -> Option<(ExecutionTask, Duration)> {
        let mut delayed = self.delayed.lock();
        if delayed.is_empty() {
            None
        } else {
            Some(delayed.remove(0))
        }
    }

    pub fn assert_enqueued_count_eq(&self, expected: usize) {
        let actual = self.enqueued.lock().len();
        assert_eq!(actual, expected, "Expected {expected} enqueued tasks, got {actual}");
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: ExecutionTask) -> Result<TaskId, QueueError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let task_id = task.task_id.clone();
        self.enqueued.lock().push(task);
        Ok(task_id)
    }

    async fn enqueue_after(
        &self,
        task: ExecutionTask,
        delay: Duration,
    ) -> Result<TaskId, QueueError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let task_id = task.task_id.clone();
        self.delayed.lock().push((task, delay));
        Ok(task_id)
    }
}
