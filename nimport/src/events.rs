use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dispatcher::FailureKind;
use crate::job::{JobId, JobMode, TaskId};

/// Metadata envelope attached to every job event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub correlation_id: Uuid,
    pub idempotency_key: String,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(
        job_id: JobId,
        correlation_id: Option<Uuid>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            version: 1,
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
            idempotency_key: idempotency_key.into(),
            job_id,
            timestamp: Utc::now(),
        }
    }
}

/// Job lifecycle event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEvent {
    pub meta: EventMeta,
    pub payload: JobEventPayload,
}

impl JobEvent {
    /// Build an event whose idempotency key is derived from the payload.
    ///
    /// The job id doubles as correlation id so every event of one job
    /// shares it.
    pub fn for_job(job_id: JobId, payload: JobEventPayload) -> Self {
        let key = format!("{}-{}-{}", payload.name(), job_id, payload.attempt());
        Self {
            meta: EventMeta::new(job_id, Some(job_id.0), key),
            payload,
        }
    }
}

/// Event payload emitted for job lifecycle transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum JobEventPayload {
    /// Job record was created.
    Created { site_code: String, mode: JobMode },
    /// Job was handed to background workers.
    Queued { task_id: TaskId, worker_count: usize },
    /// An execution attempt began.
    Started { attempt: u32 },
    /// An attempt failed and another was scheduled.
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// Job finished successfully.
    Completed {
        changes_detected: bool,
        changes_applied: bool,
    },
    /// Job finished unsuccessfully.
    Failed { kind: FailureKind, error: String },
}

impl JobEventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    fn attempt(&self) -> u32 {
        match self {
            Self::Started { attempt } | Self::RetryScheduled { attempt, .. } => *attempt,
            _ => 0,
        }
    }
}

/// Publishes job lifecycle events.
#[async_trait]
pub trait JobEventPublisher: Send + Sync {
    /// Publish an event to all subscribers.
    ///
    /// Returns an error if the event cannot be published.
    async fn publish(&self, event: JobEvent) -> anyhow::Result<()>;
}

/// Trait for subscribing to job lifecycle events.
pub trait JobEventStream: Send + Sync {
    fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// Publishing never waits for slow subscribers. A subscriber that falls
/// more than `capacity` events behind receives `RecvError::Lagged`.
pub struct InProcEventBus {
    job_sender: broadcast::Sender<JobEvent>,
    job_capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("job_capacity", &self.job_capacity)
            .field("job_subscribers", &self.job_sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (job_sender, _) = broadcast::channel(capacity.max(1));
        Self {
            job_sender,
            job_capacity: capacity.max(1),
        }
    }

    pub fn job_subscriber_count(&self) -> usize {
        self.job_sender.receiver_count()
    }

    pub fn job_capacity(&self) -> usize {
        self.job_capacity
    }

    /// Publish to all subscribers. Dropped silently when nobody listens.
    pub fn publish_job(&self, event: JobEvent) -> anyhow::Result<()> {
        let _ = self.job_sender.send(event);
        Ok(())
    }

    pub fn subscribe_job_events(&self) -> broadcast::Receiver<JobEvent> {
        self.job_sender.subscribe()
    }
}

#[async_trait]
impl JobEventPublisher for InProcEventBus {
    async fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
        self.publish_job(event)
    }
}

impl JobEventStream for InProcEventBus {
    fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent> {
        self.subscribe_job_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn started(job_id: JobId, attempt: u32) -> JobEvent {
        JobEvent::for_job(job_id, JobEventPayload::Started { attempt })
    }

    #[tokio::test]
    async fn test_event_bus_broadcast_to_multiple_subscribers() {
        let bus = InProcEventBus::new(100);
        let mut rx1 = bus.subscribe_jobs();
        let mut rx2 = bus.subscribe_jobs();

        let job_id = JobId::new();
        for attempt in 1..=3 {
            bus.publish(started(job_id, attempt)).await.unwrap();
        }

        for attempt in 1..=3 {
            let a = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let b = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(a.payload, JobEventPayload::Started { attempt: n } if n == attempt));
            assert_eq!(a.meta.idempotency_key, b.meta.idempotency_key);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = InProcEventBus::new(2);
        let mut rx = bus.subscribe_jobs();

        let job_id = JobId::new();
        for attempt in 0..5 {
            bus.publish_job(started(job_id, attempt)).unwrap();
        }

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(
            result,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) | Ok(Ok(_))
        ));
    }

    #[test]
    fn test_event_meta_for_job() {
        let job_id = JobId::new();
        let event = JobEvent::for_job(
            job_id,
            JobEventPayload::RetryScheduled {
                attempt: 2,
                delay_ms: 120_000,
                error: "timeout".into(),
            },
        );

        assert_eq!(event.meta.version, 1);
        assert_eq!(event.meta.correlation_id, job_id.0);
        assert_eq!(
            event.meta.idempotency_key,
            format!("retry_scheduled-{job_id}-2")
        );
        assert!(event.meta.timestamp <= Utc::now());
    }

    #[test]
    fn test_payload_serializes_with_tag() {
        let payload = JobEventPayload::Failed {
            kind: FailureKind::Config,
            error: "inventory section is required".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event"], "failed");
        assert_eq!(value["kind"], "config");
    }

    #[tokio::test]
    async fn test_event_bus_debug_format() {
        let bus = InProcEventBus::new(100);
        let _rx1 = bus.subscribe_jobs();
        let _rx2 = bus.subscribe_jobs();

        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("InProcEventBus"));
        assert!(debug_str.contains("job_subscribers: 2"));
        assert!(debug_str.contains("job_capacity: 100"));
    }
}
