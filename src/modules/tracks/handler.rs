use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::events::{TranscodeOutcome, TranscodingInfo};
use super::model::TrackId;
use super::repository::TrackTransaction;
use super::service::{ReportApplied, TrackService};
use crate::infrastructure::queue::JobEnvelope;
use crate::workers::error::{JobError, JobResult};
use crate::workers::handler::{JobHandler, JobOutcome};

/// Records what the transcoding backend reported about a track.
pub struct TranscodingInfosHandler;

impl TranscodingInfosHandler {
    fn parse(envelope: &JobEnvelope) -> JobResult<TranscodingInfo> {
        serde_json::from_value(envelope.payload.clone())
            .map_err(|e| JobError::MalformedJob(e.to_string()))
    }

    async fn process(
        &self,
        envelope: &JobEnvelope,
        tx: &mut dyn TrackTransaction,
    ) -> JobResult<JobOutcome> {
        let report = Self::parse(envelope)?;

        if report.outcome == TranscodeOutcome::Failed {
            warn!(
                "Transcoding of track {} failed: {}",
                report.track_id,
                report.message.as_deref().unwrap_or("no details")
            );
        }

        match TrackService::apply_transcoding_info(tx, &report).await? {
            ReportApplied::UnknownTrack => Err(JobError::unknown_track(report.track_id)),
            ReportApplied::Recorded(notice) => {
                info!(
                    "📝 Track {} recorded as {:?}",
                    report.track_id, report.outcome
                );
                Ok(JobOutcome::Success { notice })
            }
        }
    }
}

#[async_trait]
impl JobHandler for TranscodingInfosHandler {
    fn track_id(&self, envelope: &JobEnvelope) -> Option<TrackId> {
        envelope.payload.get("track_id").and_then(Value::as_i64)
    }

    async fn handle(&self, envelope: &JobEnvelope, tx: &mut dyn TrackTransaction) -> JobOutcome {
        match self.process(envelope, tx).await {
            Ok(outcome) => outcome,
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tracks::events::TRANSCODING_INFOS_QUEUE;
    use crate::modules::tracks::memory::MemoryTrackStore;
    use crate::modules::tracks::model::{TrackOwner, TrackStatus};
    use crate::modules::tracks::repository::TrackStore;
    use serde_json::json;

    fn store() -> MemoryTrackStore {
        let store = MemoryTrackStore::new();
        for id in [7, 42] {
            store.insert_track(
                id,
                TrackOwner {
                    user_id: id * 10,
                    username: format!("user{}", id),
                    email: Some(format!("user{}@example.org", id)),
                },
            );
        }
        store
    }

    async fn run(store: &MemoryTrackStore, payload: Value) -> JobOutcome {
        let envelope = JobEnvelope::new(TRANSCODING_INFOS_QUEUE, payload);
        let mut tx = store.begin().await.unwrap();
        let outcome = TranscodingInfosHandler.handle(&envelope, tx.as_mut()).await;
        if outcome.is_success() {
            tx.commit().await.unwrap();
        } else {
            tx.rollback().await.unwrap();
        }
        outcome
    }

    #[tokio::test]
    async fn success_stores_metadata_and_notifies_owner() {
        let store = store();
        let outcome = run(
            &store,
            json!({"track_id": 42, "outcome": "succeeded", "metadata": {"duration": 180, "bitrate": 128}}),
        )
        .await;

        let JobOutcome::Success { notice: Some(notice) } = outcome else {
            panic!("expected success with notice, got {:?}", outcome);
        };
        assert_eq!(notice.track_id, 42);
        assert_eq!(notice.status, TrackStatus::Done);
        assert_eq!(notice.owner.user_id, 420);

        let track = store.track(42).unwrap();
        assert_eq!(track.status, TrackStatus::Done);
        assert_eq!(track.metadata.unwrap().bitrate, Some(128));
    }

    #[tokio::test]
    async fn failed_transcode_is_a_successful_job() {
        let store = store();
        let outcome = run(&store, json!({"track_id": 7, "outcome": "failed"})).await;

        assert!(matches!(
            outcome,
            JobOutcome::Success { notice: Some(ref n) } if n.status == TrackStatus::Failed
        ));
        assert_eq!(store.track(7).unwrap().status, TrackStatus::Failed);
    }

    #[tokio::test]
    async fn malformed_payload_is_fatal() {
        let store = store();
        for payload in [
            json!("garbage"),
            json!({"track_id": "seven", "outcome": "failed"}),
            json!({"track_id": 7}),
        ] {
            let outcome = run(&store, payload).await;
            assert!(
                matches!(outcome, JobOutcome::FatalFailure(ref r) if r.starts_with("invalid payload")),
                "{:?}",
                outcome
            );
        }
        assert_eq!(store.track(7).unwrap().status, TrackStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_track_is_fatal_and_creates_nothing() {
        let store = store();
        let outcome = run(&store, json!({"track_id": 999, "outcome": "succeeded"})).await;

        assert_eq!(outcome, JobOutcome::FatalFailure("unknown track 999".to_string()));
        assert!(store.track(999).is_none());
        assert_eq!(store.track_count(), 2);
    }

    #[tokio::test]
    async fn lock_contention_is_retryable() {
        let store = store();
        store.fail_next_reads(1);

        let outcome = run(&store, json!({"track_id": 42, "outcome": "succeeded"})).await;

        assert!(matches!(outcome, JobOutcome::RetryableFailure(_)));
        assert_eq!(store.track(42).unwrap().status, TrackStatus::Pending);
    }

    #[test]
    fn track_id_is_read_from_payload() {
        let handler = TranscodingInfosHandler;
        let envelope = JobEnvelope::new(TRANSCODING_INFOS_QUEUE, json!({"track_id": 42}));
        assert_eq!(handler.track_id(&envelope), Some(42));

        let envelope = JobEnvelope::new(TRANSCODING_INFOS_QUEUE, json!("42"));
        assert_eq!(handler.track_id(&envelope), None);
    }
}
