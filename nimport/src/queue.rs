use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::job::{ImportJob, JobId, JobMode, TaskId};

/// A unit of work handed to background workers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub mode: JobMode,
    /// 1-based attempt number.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ExecutionTask {
    pub fn first(job: &ImportJob) -> Self {
        Self {
            task_id: TaskId::new(),
            job_id: job.id,
            mode: job.mode,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// The task for the attempt after this one. Keeps the task id so the
    /// job's task reference stays valid across retries.
    pub fn next_attempt(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            job_id: self.job_id,
            mode: self.mode,
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }
}

/// The queue refused a task. The caller decides whether to fall back.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
    #[error("task queue is full")]
    Full,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Hands execution tasks to background workers.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: ExecutionTask) -> Result<TaskId, QueueError>;

    /// Deliver `task` once `delay` has passed.
    async fn enqueue_after(
        &self,
        task: ExecutionTask,
        delay: Duration,
    ) -> Result<TaskId, QueueError>;
}

/// In-process queue backed by a bounded tokio channel.
#[derive(Clone, Debug)]
pub struct LocalTaskQueue {
    sender: mpsc::Sender<ExecutionTask>,
}

/// Receiving half of a [`LocalTaskQueue`], shared by all workers.
#[derive(Clone, Debug)]
pub struct TaskReceiver {
    inner: Arc<Mutex<mpsc::Receiver<ExecutionTask>>>,
}

impl LocalTaskQueue {
    pub fn new(capacity: usize) -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self { sender },
            TaskReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Tasks waiting for a worker.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: ExecutionTask) -> Result<TaskId, QueueError> {
        let task_id = task.task_id.clone();
        self.sender.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        Ok(task_id)
    }

    async fn enqueue_after(
        &self,
        task: ExecutionTask,
        delay: Duration,
    ) -> Result<TaskId, QueueError> {
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }

        let task_id = task.task_id.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job_id = task.job_id;
            let attempt = task.attempt;
            if sender.send(task).await.is_err() {
                tracing::warn!(
                    %job_id,
                    attempt,
                    "task queue closed before delayed task was delivered"
                );
            }
        });
        Ok(task_id)
    }
}

impl TaskReceiver {
    /// Next task, or `None` once every queue handle is dropped.
    pub async fn recv(&self) -> Option<ExecutionTask> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> ImportJob {
        ImportJob::new("hq", JobMode::Check, json!({}))
    }

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, receiver) = LocalTaskQueue::new(4);
        let task = ExecutionTask::first(&job());
        let id = queue.enqueue(task.clone()).await.unwrap();
        assert_eq!(id, task.task_id);
        assert_eq!(queue.depth(), 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.job_id, task.job_id);
        assert_eq!(received.attempt, 1);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_is_refused() {
        let (queue, _receiver) = LocalTaskQueue::new(1);
        let job = job();
        queue.enqueue(ExecutionTask::first(&job)).await.unwrap();
        let err = queue.enqueue(ExecutionTask::first(&job)).await.unwrap_err();
        assert!(matches!(err, QueueError::Full));
    }

    #[tokio::test]
    async fn test_closed_queue_is_refused() {
        let (queue, receiver) = LocalTaskQueue::new(1);
        drop(receiver);
        let task = ExecutionTask::first(&job());
        assert!(matches!(
            queue.enqueue(task.clone()).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(
            queue.enqueue_after(task, Duration::from_millis(1)).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_enqueue() {
        let (queue, receiver) = LocalTaskQueue::new(4);
        let task = ExecutionTask::first(&job()).next_attempt();
        queue
            .enqueue_after(task.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_secs(30), receiver.recv()).await;
        assert!(early.is_err());

        let received = tokio::time::timeout(Duration::from_secs(60), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.attempt, 2);
        assert_eq!(received.task_id, task.task_id);
    }
}
