use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::WorkerConfig;
use super::error::JobError;
use super::handler::{JobHandler, JobOutcome};
use super::registry::HandlerRegistry;
use crate::infrastructure::notify::Notifier;
use crate::infrastructure::queue::{Delivery, JobEnvelope, QueueClient};
use crate::modules::tracks::events::TrackNotice;
use crate::modules::tracks::model::TrackId;
use crate::modules::tracks::repository::TrackStore;
use crate::modules::tracks::service::TrackService;

/// Collaborators a worker talks to. Cheap to clone.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn QueueClient>,
    pub store: Arc<dyn TrackStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Job counters, shared with the health probe.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Poll, dispatch, acknowledge. One `Worker` can run several loops on the
/// same queue; they share nothing but the collaborators and the counters.
#[derive(Clone)]
pub struct Worker {
    deps: WorkerDeps,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        Self {
            deps,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Launches the handler registered for `queue`.
    pub async fn launch_registered(
        &self,
        queue: &str,
        registry: &HandlerRegistry,
        stop: CancellationToken,
    ) -> Result<()> {
        let handler = registry
            .get(queue)
            .ok_or_else(|| anyhow!("No handler registered for queue '{}'", queue))?;
        self.launch(queue, handler, stop).await
    }

    /// Consumes `queue` with `config.concurrency` loops until `stop` fires.
    ///
    /// A stop request lets in-flight jobs finish. Returns an error only when
    /// the queue cannot be prepared or a loop dies.
    pub async fn launch(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
        stop: CancellationToken,
    ) -> Result<()> {
        let recovered = self
            .deps
            .queue
            .recover(queue)
            .await
            .map_err(|e| anyhow!("Failed to prepare queue '{}': {}", queue, e))?;
        if recovered > 0 {
            info!("Recovered {} unacknowledged job(s) on '{}'", recovered, queue);
        }

        let slots = self.config.concurrency.max(1);
        info!("🎥 Starting {} worker loop(s) on '{}'", slots, queue);

        let loops_stop = stop.child_token();
        let mut loops = JoinSet::new();
        for slot in 0..slots {
            let worker = self.clone();
            let handler = handler.clone();
            let stop = loops_stop.clone();
            let queue = queue.to_string();
            loops.spawn(async move { worker.run_loop(slot, &queue, handler.as_ref(), &stop).await });
        }

        let mut crashed = None;
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Worker loop on '{}' crashed: {}", queue, e);
                loops_stop.cancel();
                crashed.get_or_insert(e);
            }
        }

        match crashed {
            Some(e) => Err(anyhow!("Worker loop on '{}' crashed: {}", queue, e)),
            None => {
                info!("🛑 Worker on '{}' stopped", queue);
                Ok(())
            }
        }
    }

    async fn run_loop(
        &self,
        slot: usize,
        queue: &str,
        handler: &dyn JobHandler,
        stop: &CancellationToken,
    ) {
        info!("🎧 Worker slot {} listening on '{}'", slot, queue);
        let mut broker_failures: u32 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = self.deps.queue.dequeue(queue, self.config.poll_timeout) => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    broker_failures = 0;
                    self.process(delivery, handler, stop).await;
                }
                Ok(None) => {
                    broker_failures = 0;
                    debug!("No job on '{}' within {:?}", queue, self.config.poll_timeout);
                }
                Err(e) => {
                    broker_failures = broker_failures.saturating_add(1);
                    let delay = self.config.backoff_for(broker_failures);
                    if e.is_retryable() {
                        warn!("Dequeue from '{}' failed: {}. Retrying in {:?}", queue, e, delay);
                    } else {
                        error!("Dequeue from '{}' failed: {}. Retrying in {:?}", queue, e, delay);
                    }
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Worker slot {} on '{}' stopped", slot, queue);
    }

    async fn process(&self, delivery: Delivery, handler: &dyn JobHandler, stop: &CancellationToken) {
        let mut envelope = delivery.envelope.clone();
        envelope.attempts = envelope.attempts.saturating_add(1);
        let track_id = handler.track_id(&envelope);

        let span = info_span!(
            "job",
            job_id = %envelope.id,
            queue = %envelope.queue,
            attempt = envelope.attempts,
            track_id = ?track_id,
        );

        async {
            WorkerStats::bump(&self.stats.processed);
            info!("📦 Received job");

            if envelope.attempts > self.config.max_attempts {
                // Budget spent on an earlier delivery; only the Failed write is missing.
                self.fail(&delivery, &envelope, track_id, "retry budget already spent", stop)
                    .await;
                return;
            }

            let outcome = self.execute(&envelope, track_id, handler).await;
            self.settle(&delivery, &envelope, track_id, outcome, stop)
                .await;
        }
        .instrument(span)
        .await
    }

    /// Runs the handler in a fresh transaction and folds every failure mode
    /// into a `JobOutcome`.
    async fn execute(
        &self,
        envelope: &JobEnvelope,
        track_id: Option<TrackId>,
        handler: &dyn JobHandler,
    ) -> JobOutcome {
        if let Some(track_id) = track_id {
            if let Err(e) = TrackService::mark_processing(self.deps.store.as_ref(), track_id).await {
                return JobError::from(e).into();
            }
        }

        let mut tx = match self.deps.store.begin().await {
            Ok(tx) => tx,
            Err(e) => return JobError::from(e).into(),
        };

        let outcome = match AssertUnwindSafe(handler.handle(envelope, tx.as_mut()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => JobOutcome::FatalFailure(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        match outcome {
            JobOutcome::Success { notice } => match tx.commit().await {
                Ok(()) => JobOutcome::Success { notice },
                Err(e) => JobError::from(e).into(),
            },
            other => {
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback failed: {}", e);
                }
                other
            }
        }
    }

    async fn settle(
        &self,
        delivery: &Delivery,
        envelope: &JobEnvelope,
        track_id: Option<TrackId>,
        outcome: JobOutcome,
        stop: &CancellationToken,
    ) {
        match outcome {
            JobOutcome::Success { notice } => {
                if let Err(e) = self.deps.queue.ack(delivery).await {
                    error!("Failed to ack job: {}. It will be delivered again", e);
                }
                WorkerStats::bump(&self.stats.succeeded);
                info!("✅ Job completed");

                if let Some(notice) = notice {
                    self.send_notice(&notice).await;
                }
            }
            JobOutcome::RetryableFailure(reason) if envelope.attempts < self.config.max_attempts => {
                let delay = self.config.backoff_for(envelope.attempts);
                warn!(
                    "🔁 Attempt {}/{} failed: {}. Retrying in {:?}",
                    envelope.attempts, self.config.max_attempts, reason, delay
                );
                WorkerStats::bump(&self.stats.retried);
                self.requeue(delivery, envelope, delay, stop).await;
            }
            JobOutcome::RetryableFailure(reason) => {
                let reason = format!("gave up after {} attempts: {}", envelope.attempts, reason);
                self.fail(delivery, envelope, track_id, &reason, stop).await;
            }
            JobOutcome::FatalFailure(reason) => {
                self.fail(delivery, envelope, track_id, &reason, stop).await;
            }
        }
    }

    /// Waits `delay` (cut short by `stop`), then publishes `envelope` again.
    async fn requeue(
        &self,
        delivery: &Delivery,
        envelope: &JobEnvelope,
        delay: Duration,
        stop: &CancellationToken,
    ) {
        tokio::select! {
            _ = stop.cancelled() => debug!("Stop requested, re-queueing without delay"),
            _ = tokio::time::sleep(delay) => {}
        }

        if let Err(e) = self.deps.queue.retry(delivery, envelope).await {
            error!("Failed to re-queue job: {}. It stays unacknowledged", e);
        }
    }

    /// Terminal failure: mark the track, drop the job, tell the owner.
    ///
    /// The job is only dropped once the track is marked. When the store is
    /// unreachable the job goes back to the queue with its retry budget
    /// spent, so the next delivery goes straight to this write.
    async fn fail(
        &self,
        delivery: &Delivery,
        envelope: &JobEnvelope,
        track_id: Option<TrackId>,
        reason: &str,
        stop: &CancellationToken,
    ) {
        error!("❌ Job failed: {}", reason);

        let notice = match track_id {
            Some(track_id) => {
                match TrackService::mark_failed(self.deps.store.as_ref(), track_id).await {
                    Ok(notice) => notice,
                    Err(e) if e.is_transient() => {
                        let delay = self.config.backoff_for(envelope.attempts);
                        warn!(
                            "Could not mark track {} as failed: {}. Re-queueing in {:?}",
                            track_id, e, delay
                        );
                        let mut pending = envelope.clone();
                        pending.attempts = pending.attempts.max(self.config.max_attempts);
                        WorkerStats::bump(&self.stats.retried);
                        self.requeue(delivery, &pending, delay, stop).await;
                        return;
                    }
                    Err(e) => {
                        error!("Could not mark track {} as failed: {}", track_id, e);
                        None
                    }
                }
            }
            None => None,
        };

        WorkerStats::bump(&self.stats.failed);

        if let Err(e) = self.deps.queue.ack(delivery).await {
            error!("Failed to ack failed job: {}", e);
        }

        if let Some(notice) = notice {
            self.send_notice(&notice).await;
        }
    }

    async fn send_notice(&self, notice: &TrackNotice) {
        if let Err(e) = self.deps.notifier.notify(notice).await {
            warn!(
                "Notification for track {} ({}) failed: {:#}",
                notice.track_id, notice.status, e
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
