#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use track_jobs::infrastructure::notify::Notifier;
use track_jobs::infrastructure::queue::MemoryQueue;
use track_jobs::modules::tracks::events::{TRANSCODING_INFOS_QUEUE, TrackNotice};
use track_jobs::modules::tracks::memory::MemoryTrackStore;
use track_jobs::modules::tracks::model::{TrackId, TrackOwner};
use track_jobs::workers::{JobHandler, StatsSnapshot, Worker, WorkerConfig, WorkerDeps};

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<TrackNotice>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<TrackNotice> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &TrackNotice) -> Result<()> {
        self.sent.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(anyhow!("mail relay unavailable"));
        }
        Ok(())
    }
}

pub fn owner(user_id: i64) -> TrackOwner {
    TrackOwner {
        user_id,
        username: format!("user{}", user_id),
        email: Some(format!("user{}@example.org", user_id)),
    }
}

/// Short polls and no backoff, so scenarios finish in milliseconds.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        max_attempts: 3,
        poll_timeout: Duration::from_millis(20),
        concurrency: 1,
        retry_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

pub struct Harness {
    pub queue: Arc<MemoryQueue>,
    pub store: MemoryTrackStore,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: Worker,
}

impl Harness {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_notifier(config, RecordingNotifier::default())
    }

    pub fn with_notifier(config: WorkerConfig, notifier: RecordingNotifier) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let store = MemoryTrackStore::new();
        let notifier = Arc::new(notifier);
        let worker = Worker::new(
            WorkerDeps {
                queue: queue.clone(),
                store: Arc::new(store.clone()),
                notifier: notifier.clone(),
            },
            config,
        );

        Self {
            queue,
            store,
            notifier,
            worker,
        }
    }

    pub fn add_track(&self, track_id: TrackId, user_id: i64) {
        self.store.insert_track(track_id, owner(user_id));
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.worker.stats().snapshot()
    }

    /// Runs the worker on `transcoding_infos` until `done` holds for its
    /// counters, then stops it and waits for the loops to exit.
    pub async fn run_until<F>(&self, handler: Arc<dyn JobHandler>, done: F)
    where
        F: Fn(&StatsSnapshot) -> bool,
    {
        let stop = CancellationToken::new();
        let worker = self.worker.clone();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { worker.launch(TRANSCODING_INFOS_QUEUE, handler, stop).await }
        });

        let stats = self.worker.stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&stats.snapshot()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("worker did not settle, stats: {:?}", stats.snapshot()));

        stop.cancel();
        task.await.unwrap().unwrap();
    }

    pub fn queue_is_drained(&self) -> bool {
        self.queue.ready_len(TRANSCODING_INFOS_QUEUE) == 0
            && self.queue.in_flight_len(TRANSCODING_INFOS_QUEUE) == 0
    }
}
