//! Broker access for job queues.
//!
//! Every backend gives at-least-once delivery: a dequeued job belongs to the
//! broker until it is acknowledged, and is handed out again if the consumer
//! goes away first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod envelope;
pub mod memory;
pub mod rabbitmq;
pub mod redis_queue;

pub use envelope::{Delivery, JobEnvelope, Receipt};
pub use memory::MemoryQueue;
pub use rabbitmq::RabbitMqService;
pub use redis_queue::RedisQueue;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("failed to serialize job: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker protocol error: {0}")]
    Protocol(String),
}

impl QueueError {
    /// Connection problems are worth waiting out; everything else is a bug
    /// or a misconfiguration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Connection(_))
    }
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Publishes `payload` as a new job on `queue`.
    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<JobEnvelope>;

    /// Waits up to `wait` for the next job. `Ok(None)` means the queue
    /// stayed empty.
    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Delivery>>;

    /// Removes a delivered job for good.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Publishes `envelope` again and drops the original delivery.
    async fn retry(&self, delivery: &Delivery, envelope: &JobEnvelope) -> QueueResult<()>;

    /// Returns jobs this consumer left unacknowledged in a previous run to
    /// the queue. Brokers that redeliver on their own return 0.
    async fn recover(&self, _queue: &str) -> QueueResult<usize> {
        Ok(0)
    }
}

/// Connects to the broker named by `url`; the scheme picks the backend.
pub async fn connect(
    url: &str,
    consumer_name: &str,
    concurrency: usize,
) -> anyhow::Result<Arc<dyn QueueClient>> {
    if url.starts_with("amqp://") || url.starts_with("amqps://") {
        let prefetch = u16::try_from(concurrency).unwrap_or(u16::MAX);
        let service = RabbitMqService::new(url, consumer_name, prefetch).await?;
        Ok(Arc::new(service))
    } else if url.starts_with("redis://") || url.starts_with("rediss://") {
        let service = RedisQueue::new(url, consumer_name).await?;
        Ok(Arc::new(service))
    } else {
        Err(anyhow::anyhow!("Unsupported broker URL scheme: {}", url))
    }
}
