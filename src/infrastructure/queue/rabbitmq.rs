use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, options::*,
    types::FieldTable,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Delivery, JobEnvelope, QueueClient, QueueError, QueueResult, Receipt};

impl From<lapin::Error> for QueueError {
    fn from(e: lapin::Error) -> Self {
        QueueError::Connection(e.to_string())
    }
}

/// Consumer state for one queue. Delivery tags are scoped to `channel`.
/// Worker loops share `consumer`; only the lock holder polls it.
struct QueueConsumer {
    channel: Channel,
    consumer: Arc<Mutex<Consumer>>,
}

/// Waits up to `wait`, lock included, for the next item of a shared stream.
/// `None` means the wait elapsed.
async fn next_within<S>(stream: &Mutex<S>, wait: Duration) -> Option<Option<S::Item>>
where
    S: Stream + Unpin,
{
    tokio::time::timeout(wait, async { stream.lock().await.next().await })
        .await
        .ok()
}

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    consumer_tag: String,
    prefetch: u16,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
    consumers: Arc<Mutex<HashMap<String, QueueConsumer>>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> Result<(Connection, Channel)> {
        info!("Connecting to RabbitMQ at {}", url);
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))?;

        info!("✅ Connected to RabbitMQ");
        Ok((conn, channel))
    }

    /// `prefetch` bounds how many unacknowledged deliveries this process
    /// holds per queue; it should match the number of worker loops.
    pub async fn new(url: &str, consumer_tag: &str, prefetch: u16) -> Result<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            consumer_tag: consumer_tag.to_string(),
            prefetch: prefetch.max(1),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
            consumers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        *self.conn.lock().await = conn;
        *self.channel.lock().await = channel;
        // Old consumer channels died with the connection; their unacked
        // deliveries go back to the broker.
        self.consumers.lock().await.clear();
        Ok(())
    }

    async fn declare(channel: &Channel, queue: &str) -> QueueResult<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, queue).await?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        Ok(())
    }

    pub async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        if let Err(e) = self.publish_internal(queue, payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(queue, payload).await?;
        }

        Ok(())
    }

    async fn open_consumer(&self, queue: &str) -> QueueResult<QueueConsumer> {
        let conn = self.conn.lock().await;
        let channel = conn.create_channel().await?;
        drop(conn);

        Self::declare(&channel, queue).await?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("🎧 Consuming '{}' as '{}'", queue, self.consumer_tag);
        Ok(QueueConsumer {
            channel,
            consumer: Arc::new(Mutex::new(consumer)),
        })
    }

    /// Forgets the consumer for `queue` unless another loop already replaced it.
    async fn drop_consumer(&self, queue: &str, consumer: &Arc<Mutex<Consumer>>) {
        let mut consumers = self.consumers.lock().await;
        if consumers
            .get(queue)
            .is_some_and(|entry| Arc::ptr_eq(&entry.consumer, consumer))
        {
            consumers.remove(queue);
        }
    }

    async fn settle(&self, delivery: &Delivery) -> QueueResult<()> {
        let Receipt::Amqp(tag) = delivery.receipt else {
            return Err(QueueError::Protocol(format!(
                "receipt {:?} does not belong to RabbitMQ",
                delivery.receipt
            )));
        };

        let consumers = self.consumers.lock().await;
        let entry = consumers.get(&delivery.envelope.queue).ok_or_else(|| {
            QueueError::Connection(format!(
                "consumer channel for '{}' is gone; delivery {} will be redelivered",
                delivery.envelope.queue, tag
            ))
        })?;

        entry
            .channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueClient for RabbitMqService {
    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<JobEnvelope> {
        let envelope = JobEnvelope::new(queue, payload);
        self.publish(queue, &envelope.to_bytes()?).await?;
        debug!("Published job {} to '{}'", envelope.id, queue);
        Ok(envelope)
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Delivery>> {
        let consumer = {
            let mut consumers = self.consumers.lock().await;
            if !consumers.contains_key(queue) {
                let opened = self.open_consumer(queue).await?;
                consumers.insert(queue.to_string(), opened);
            }
            match consumers.get(queue) {
                Some(entry) => Arc::clone(&entry.consumer),
                None => return Ok(None),
            }
        };

        match next_within(&consumer, wait).await {
            None => Ok(None),
            Some(Some(Ok(delivery))) => Ok(Some(Delivery {
                envelope: JobEnvelope::from_bytes(queue, &delivery.data),
                receipt: Receipt::Amqp(delivery.delivery_tag),
            })),
            Some(Some(Err(e))) => {
                self.drop_consumer(queue, &consumer).await;
                Err(e.into())
            }
            Some(None) => {
                self.drop_consumer(queue, &consumer).await;
                Err(QueueError::Connection(format!(
                    "consumer for '{}' was cancelled by the broker",
                    queue
                )))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.settle(delivery).await
    }

    async fn retry(&self, delivery: &Delivery, envelope: &JobEnvelope) -> QueueResult<()> {
        // Publish first: a crash in between duplicates the job rather than losing it.
        self.publish(&envelope.queue, &envelope.to_bytes()?).await?;
        self.settle(delivery).await
    }
}
