use tracing::{debug, info, warn};

use super::events::{TrackNotice, TranscodeOutcome, TranscodingInfo};
use super::model::{TrackId, TrackStatus};
use super::repository::{StoreResult, TrackStore, TrackTransaction};

/// What applying a backend report did to the track.
#[derive(Debug, PartialEq)]
pub enum ReportApplied {
    UnknownTrack,
    /// Status written; carries a notice when the status actually changed.
    Recorded(Option<TrackNotice>),
}

pub struct TrackService;

impl TrackService {
    /// Moves a `Pending` track to `Processing` in a transaction of its own,
    /// so the transition is visible while the job runs. Returns whether the
    /// status changed.
    pub async fn mark_processing(store: &dyn TrackStore, track_id: TrackId) -> StoreResult<bool> {
        let mut tx = store.begin().await?;

        let changed = match tx.get_track_info(track_id).await? {
            Some(info) if info.status == TrackStatus::Pending => {
                tx.update_track_info(track_id, TrackStatus::Processing, None)
                    .await?;
                true
            }
            _ => false,
        };

        if changed {
            tx.commit().await?;
            debug!("Track {} is now processing", track_id);
        } else {
            tx.rollback().await?;
        }
        Ok(changed)
    }

    /// Records a job that could not be completed. Unknown tracks and tracks
    /// that already reached `Done` or `Failed` are left alone and yield no
    /// notice; only a backend report may change a terminal status.
    pub async fn mark_failed(
        store: &dyn TrackStore,
        track_id: TrackId,
    ) -> StoreResult<Option<TrackNotice>> {
        let mut tx = store.begin().await?;

        let info = match tx.get_track_info(track_id).await? {
            Some(info) if !info.status.is_terminal() => info,
            _ => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        tx.update_track_info(track_id, TrackStatus::Failed, None)
            .await?;
        tx.commit().await?;

        info!("Track {} marked as failed", track_id);
        Ok(Some(TrackNotice {
            owner: info.owner,
            track_id,
            status: TrackStatus::Failed,
        }))
    }

    /// Applies a backend report inside the job's transaction.
    ///
    /// The report is authoritative for its message, so `Done` and `Failed`
    /// may replace each other when reports arrive out of order. A report
    /// that repeats the current status produces no notice.
    pub async fn apply_transcoding_info(
        tx: &mut dyn TrackTransaction,
        report: &TranscodingInfo,
    ) -> StoreResult<ReportApplied> {
        let Some(current) = tx.get_track_info(report.track_id).await? else {
            return Ok(ReportApplied::UnknownTrack);
        };

        let (status, metadata) = match report.outcome {
            TranscodeOutcome::Succeeded => (TrackStatus::Done, report.metadata.as_ref()),
            TranscodeOutcome::Failed => (TrackStatus::Failed, None),
        };

        if current.status == status {
            // Redelivery: write again so metadata stays current, but stay quiet.
            tx.update_track_info(report.track_id, status, metadata)
                .await?;
            debug!(
                "Track {} already {}; report re-applied without notice",
                report.track_id, status
            );
            return Ok(ReportApplied::Recorded(None));
        }

        if current.status.is_terminal() {
            warn!(
                "Track {} moves from {} to {} on an out-of-order report",
                report.track_id, current.status, status
            );
        }

        tx.update_track_info(report.track_id, status, metadata)
            .await?;

        Ok(ReportApplied::Recorded(Some(TrackNotice {
            owner: current.owner,
            track_id: report.track_id,
            status,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tracks::memory::MemoryTrackStore;
    use crate::modules::tracks::model::{TrackMetadata, TrackOwner};

    fn store_with_track(track_id: TrackId) -> MemoryTrackStore {
        let store = MemoryTrackStore::new();
        store.insert_track(
            track_id,
            TrackOwner {
                user_id: 1,
                username: "dashie".to_string(),
                email: None,
            },
        );
        store
    }

    fn report(track_id: TrackId, outcome: TranscodeOutcome) -> TranscodingInfo {
        TranscodingInfo {
            track_id,
            outcome,
            metadata: Some(TrackMetadata {
                duration: Some(180.0),
                bitrate: Some(128),
                ..Default::default()
            }),
            message: None,
        }
    }

    async fn apply(store: &MemoryTrackStore, report: &TranscodingInfo) -> ReportApplied {
        let mut tx = store.begin().await.unwrap();
        let applied = TrackService::apply_transcoding_info(tx.as_mut(), report)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        applied
    }

    #[tokio::test]
    async fn mark_processing_only_moves_pending_tracks() {
        let store = store_with_track(1);

        assert!(TrackService::mark_processing(&store, 1).await.unwrap());
        assert_eq!(store.track(1).unwrap().status, TrackStatus::Processing);
        assert!(!TrackService::mark_processing(&store, 1).await.unwrap());

        apply(&store, &report(1, TranscodeOutcome::Succeeded)).await;
        assert!(!TrackService::mark_processing(&store, 1).await.unwrap());
        assert_eq!(store.track(1).unwrap().status, TrackStatus::Done);

        assert!(!TrackService::mark_processing(&store, 404).await.unwrap());
    }

    #[tokio::test]
    async fn failed_report_drops_metadata() {
        let store = store_with_track(7);

        let applied = apply(&store, &report(7, TranscodeOutcome::Failed)).await;

        let track = store.track(7).unwrap();
        assert_eq!(track.status, TrackStatus::Failed);
        assert!(track.metadata.is_none());
        assert!(matches!(applied, ReportApplied::Recorded(Some(n)) if n.status == TrackStatus::Failed));
    }

    #[tokio::test]
    async fn repeated_report_is_quiet() {
        let store = store_with_track(42);
        let done = report(42, TranscodeOutcome::Succeeded);

        assert!(matches!(apply(&store, &done).await, ReportApplied::Recorded(Some(_))));
        assert_eq!(apply(&store, &done).await, ReportApplied::Recorded(None));
        assert_eq!(store.track(42).unwrap().status, TrackStatus::Done);
    }

    #[tokio::test]
    async fn later_report_wins_over_terminal_state() {
        let store = store_with_track(42);

        apply(&store, &report(42, TranscodeOutcome::Succeeded)).await;
        apply(&store, &report(42, TranscodeOutcome::Failed)).await;

        let track = store.track(42).unwrap();
        assert_eq!(track.status, TrackStatus::Failed);
        // Metadata recorded by the earlier success is kept.
        assert_eq!(track.metadata.unwrap().duration, Some(180.0));
    }

    #[tokio::test]
    async fn mark_failed_skips_unknown_and_already_failed_tracks() {
        let store = store_with_track(3);

        let notice = TrackService::mark_failed(&store, 3).await.unwrap().unwrap();
        assert_eq!(notice.status, TrackStatus::Failed);
        assert_eq!(notice.owner.username, "dashie");

        assert!(TrackService::mark_failed(&store, 3).await.unwrap().is_none());
        assert!(TrackService::mark_failed(&store, 999).await.unwrap().is_none());
        assert_eq!(store.track_count(), 1);
    }

    #[tokio::test]
    async fn mark_failed_keeps_done_tracks() {
        let store = store_with_track(4);
        let mut tx = store.begin().await.unwrap();
        tx.update_track_info(4, TrackStatus::Done, None).await.unwrap();
        tx.commit().await.unwrap();

        assert!(TrackService::mark_failed(&store, 4).await.unwrap().is_none());
        assert_eq!(store.track(4).unwrap().status, TrackStatus::Done);
    }
}
