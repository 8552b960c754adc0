use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, RedisError, aio::MultiplexedConnection};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Delivery, JobEnvelope, QueueClient, QueueError, QueueResult, Receipt};

impl From<RedisError> for QueueError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Protocol(e.to_string())
        }
    }
}

/// Reliable list queue on Redis.
///
/// Jobs wait in `jobs:<queue>`. A dequeue moves one into this consumer's
/// processing list, where it stays until acked. Anything still there at
/// start-up was abandoned by a crash and goes back to the queue.
#[derive(Clone)]
pub struct RedisQueue {
    client: Client,
    consumer: String,
    conn: MultiplexedConnection,
}

impl RedisQueue {
    pub async fn new(connection_string: &str, consumer: &str) -> Result<Self, RedisError> {
        let client = Client::open(connection_string)?;

        let conn = client.get_multiplexed_async_connection().await?;

        info!("✅ Connected to Redis");
        Ok(Self {
            client,
            consumer: consumer.to_string(),
            conn,
        })
    }

    fn ready_key(queue: &str) -> String {
        format!("jobs:{}", queue)
    }

    fn processing_key(&self, queue: &str) -> String {
        format!("jobs:{}:processing:{}", queue, self.consumer)
    }

    fn raw_receipt(delivery: &Delivery) -> QueueResult<&str> {
        match &delivery.receipt {
            Receipt::Redis(raw) => Ok(raw),
            other => Err(QueueError::Protocol(format!(
                "receipt {:?} does not belong to Redis",
                other
            ))),
        }
    }
}

#[async_trait]
impl QueueClient for RedisQueue {
    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<JobEnvelope> {
        let envelope = JobEnvelope::new(queue, payload);
        let body = String::from_utf8_lossy(&envelope.to_bytes()?).into_owned();

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(Self::ready_key(queue))
            .arg(body)
            .query_async(&mut conn)
            .await?;

        debug!("Published job {} to '{}'", envelope.id, queue);
        Ok(envelope)
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Delivery>> {
        // Blocking commands would stall every other user of a multiplexed
        // connection, so each wait gets its own.
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // A zero timeout means "block forever" to Redis.
        let timeout_secs = wait.as_secs_f64().max(0.1);
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(Self::ready_key(queue))
            .arg(self.processing_key(queue))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(raw.map(|raw| Delivery {
            envelope: JobEnvelope::from_bytes(queue, raw.as_bytes()),
            receipt: Receipt::Redis(raw),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let raw = Self::raw_receipt(delivery)?;
        let mut conn = self.conn.clone();

        let removed: i64 = redis::cmd("LREM")
            .arg(self.processing_key(&delivery.envelope.queue))
            .arg(1)
            .arg(raw)
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            warn!(
                "Job {} was not in the processing list when acked",
                delivery.envelope.id
            );
        }
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, envelope: &JobEnvelope) -> QueueResult<()> {
        let raw = Self::raw_receipt(delivery)?;
        let body = String::from_utf8_lossy(&envelope.to_bytes()?).into_owned();
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(Self::ready_key(&envelope.queue))
            .arg(body)
            .ignore()
            .cmd("LREM")
            .arg(self.processing_key(&delivery.envelope.queue))
            .arg(1)
            .arg(raw)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let processing = self.processing_key(queue);
        let ready = Self::ready_key(queue);
        let mut moved = 0;

        // Newest first onto the consuming end, so the oldest is redelivered first.
        loop {
            let item: Option<String> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(&ready)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }

        if moved > 0 {
            warn!(
                "♻️ Returned {} abandoned job(s) from '{}' to '{}'",
                moved, processing, ready
            );
        }
        Ok(moved)
    }
}
