//! In-process track store for tests and local runs.
//!
//! Writes are staged per transaction and become visible on commit, so a
//! rolled-back job leaves no trace. Transient failures can be injected to
//! exercise retry paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::model::{TrackId, TrackInfo, TrackMetadata, TrackOwner, TrackStatus};
use super::repository::{StoreError, StoreResult, TrackStore, TrackTransaction};

#[derive(Default)]
struct MemoryState {
    tracks: HashMap<TrackId, TrackInfo>,
    failing_begins: usize,
    failing_reads: usize,
    commits: usize,
}

#[derive(Clone, Default)]
pub struct MemoryTrackStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an uploaded track in `Pending` state.
    pub fn insert_track(&self, track_id: TrackId, owner: TrackOwner) {
        let info = TrackInfo {
            track_id,
            owner,
            status: TrackStatus::Pending,
            metadata: None,
            updated_at: OffsetDateTime::now_utc(),
        };
        lock(&self.state).tracks.insert(track_id, info);
    }

    pub fn track(&self, track_id: TrackId) -> Option<TrackInfo> {
        lock(&self.state).tracks.get(&track_id).cloned()
    }

    pub fn track_count(&self) -> usize {
        lock(&self.state).tracks.len()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.state).commits
    }

    /// The next `n` calls to `begin` fail with a transient error.
    pub fn fail_next_begins(&self, n: usize) {
        lock(&self.state).failing_begins = n;
    }

    /// The next `n` reads inside a transaction fail with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        lock(&self.state).failing_reads = n;
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A panicking test thread must not wedge the other assertions.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TrackStore for MemoryTrackStore {
    async fn begin(&self) -> StoreResult<Box<dyn TrackTransaction>> {
        let mut state = lock(&self.state);
        if state.failing_begins > 0 {
            state.failing_begins -= 1;
            return Err(StoreError::Transient("connection refused".to_string()));
        }
        drop(state);

        Ok(Box::new(MemoryTrackTransaction {
            state: self.state.clone(),
            staged: HashMap::new(),
        }))
    }
}

pub struct MemoryTrackTransaction {
    state: Arc<Mutex<MemoryState>>,
    staged: HashMap<TrackId, TrackInfo>,
}

#[async_trait]
impl TrackTransaction for MemoryTrackTransaction {
    async fn get_track_info(&mut self, track_id: TrackId) -> StoreResult<Option<TrackInfo>> {
        if let Some(info) = self.staged.get(&track_id) {
            return Ok(Some(info.clone()));
        }

        let mut state = lock(&self.state);
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(StoreError::Transient("could not obtain lock on row".to_string()));
        }
        Ok(state.tracks.get(&track_id).cloned())
    }

    async fn update_track_info(
        &mut self,
        track_id: TrackId,
        status: TrackStatus,
        metadata: Option<&TrackMetadata>,
    ) -> StoreResult<()> {
        let current = match self.staged.get(&track_id) {
            Some(info) => info.clone(),
            None => lock(&self.state)
                .tracks
                .get(&track_id)
                .cloned()
                .ok_or_else(|| StoreError::Database(format!("track {} does not exist", track_id)))?,
        };

        let metadata = match (current.metadata.as_ref(), metadata) {
            (Some(existing), Some(update)) => Some(existing.merged_with(update)),
            (None, Some(update)) => Some(update.clone()),
            (existing, None) => existing.cloned(),
        };

        self.staged.insert(
            track_id,
            TrackInfo {
                status,
                metadata,
                updated_at: OffsetDateTime::now_utc(),
                ..current
            },
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut state = lock(&self.state);
        for (track_id, info) in self.staged {
            state.tracks.insert(track_id, info);
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
