use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::notify::Notifier;
use crate::infrastructure::queue::QueueClient;
use crate::modules::tracks::repository::TrackStore;
use crate::workers::{WorkerDeps, WorkerStats};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub queue: Arc<dyn QueueClient>,
    pub store: Arc<dyn TrackStore>,
    pub notifier: Arc<dyn Notifier>,
    pub stats: Arc<WorkerStats>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn TrackStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            notifier,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn worker_deps(&self) -> WorkerDeps {
        WorkerDeps {
            queue: self.queue.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
