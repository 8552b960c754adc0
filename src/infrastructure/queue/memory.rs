use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{Delivery, JobEnvelope, QueueClient, QueueError, QueueResult, Receipt};

#[derive(Default)]
struct Channel {
    ready: VecDeque<JobEnvelope>,
    in_flight: HashMap<u64, JobEnvelope>,
}

/// Process-local broker with the same delivery contract as the network
/// backends: jobs stay in flight until acked and can be redelivered.
#[derive(Default)]
pub struct MemoryQueue {
    channels: Mutex<HashMap<String, Channel>>,
    next_tag: AtomicU64,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an already-built envelope, keeping its id and attempts.
    pub fn push(&self, envelope: JobEnvelope) -> QueueResult<()> {
        let mut channels = self.lock()?;
        channels
            .entry(envelope.queue.clone())
            .or_default()
            .ready
            .push_back(envelope);
        drop(channels);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Number of jobs waiting to be delivered on `queue`.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.lock()
            .map(|c| c.get(queue).map_or(0, |ch| ch.ready.len()))
            .unwrap_or(0)
    }

    /// Number of delivered but unacknowledged jobs on `queue`.
    pub fn in_flight_len(&self, queue: &str) -> usize {
        self.lock()
            .map(|c| c.get(queue).map_or(0, |ch| ch.in_flight.len()))
            .unwrap_or(0)
    }

    /// Puts every unacknowledged job back at the front of its queue, as a
    /// broker does when a consumer dies mid-job.
    pub fn redeliver_unacked(&self) -> usize {
        let Ok(mut channels) = self.lock() else {
            return 0;
        };
        let mut moved = 0;
        for channel in channels.values_mut() {
            let mut pending: Vec<(u64, JobEnvelope)> = channel.in_flight.drain().collect();
            pending.sort_by_key(|(tag, _)| *tag);
            for (_, envelope) in pending.into_iter().rev() {
                channel.ready.push_front(envelope);
                moved += 1;
            }
        }
        drop(channels);
        if moved > 0 {
            self.notify.notify_waiters();
        }
        moved
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, HashMap<String, Channel>>> {
        self.channels
            .lock()
            .map_err(|_| QueueError::Protocol("memory queue lock poisoned".to_string()))
    }

    fn try_take(&self, queue: &str) -> QueueResult<Option<Delivery>> {
        let mut channels = self.lock()?;
        let Some(channel) = channels.get_mut(queue) else {
            return Ok(None);
        };
        let Some(envelope) = channel.ready.pop_front() else {
            return Ok(None);
        };
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        channel.in_flight.insert(tag, envelope.clone());
        Ok(Some(Delivery {
            envelope,
            receipt: Receipt::Memory(tag),
        }))
    }

    fn settle(&self, delivery: &Delivery) -> QueueResult<JobEnvelope> {
        let Receipt::Memory(tag) = delivery.receipt else {
            return Err(QueueError::Protocol(format!(
                "receipt {:?} does not belong to the memory queue",
                delivery.receipt
            )));
        };
        let mut channels = self.lock()?;
        channels
            .get_mut(&delivery.envelope.queue)
            .and_then(|ch| ch.in_flight.remove(&tag))
            .ok_or_else(|| QueueError::Protocol(format!("unknown delivery tag {}", tag)))
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn enqueue(&self, queue: &str, payload: Value) -> QueueResult<JobEnvelope> {
        let envelope = JobEnvelope::new(queue, payload);
        self.push(envelope.clone())?;
        Ok(envelope)
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(queue)? {
                return Ok(Some(delivery));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("memory queue '{}' empty after {:?}", queue, wait);
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.settle(delivery)?;
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, envelope: &JobEnvelope) -> QueueResult<()> {
        self.settle(delivery)?;
        self.push(envelope.clone())
    }
}
