use serde::{Deserialize, Serialize};

use super::model::{TrackId, TrackMetadata, TrackOwner, TrackStatus};

pub const TRANSCODING_INFOS_QUEUE: &str = "transcoding_infos";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeOutcome {
    #[serde(alias = "success", alias = "done")]
    Succeeded,
    #[serde(alias = "failure", alias = "error")]
    Failed,
}

/// Payload of a `transcoding_infos` job, as published by the web tier when
/// the transcoding backend reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodingInfo {
    pub track_id: TrackId,
    pub outcome: TranscodeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TrackMetadata>,
    /// Free-form detail from the backend, usually an error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to tell a track's owner where their upload ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackNotice {
    pub owner: TrackOwner,
    pub track_id: TrackId,
    pub status: TrackStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_success_with_metadata() {
        let info: TranscodingInfo = serde_json::from_value(json!({
            "track_id": 42,
            "outcome": "succeeded",
            "metadata": {"duration": 180, "bitrate": 128}
        }))
        .unwrap();

        assert_eq!(info.track_id, 42);
        assert_eq!(info.outcome, TranscodeOutcome::Succeeded);
        let metadata = info.metadata.unwrap();
        assert_eq!(metadata.duration, Some(180.0));
        assert_eq!(metadata.bitrate, Some(128));
        assert_eq!(metadata.format, None);
    }

    #[test]
    fn parses_failure_without_metadata() {
        let info: TranscodingInfo =
            serde_json::from_value(json!({"track_id": 7, "outcome": "failed"})).unwrap();
        assert_eq!(info.outcome, TranscodeOutcome::Failed);
        assert!(info.metadata.is_none());
    }

    #[test]
    fn rejects_unknown_outcome_and_missing_track() {
        assert!(
            serde_json::from_value::<TranscodingInfo>(json!({"track_id": 1, "outcome": "maybe"}))
                .is_err()
        );
        assert!(serde_json::from_value::<TranscodingInfo>(json!({"outcome": "failed"})).is_err());
        assert!(serde_json::from_value::<TranscodingInfo>(json!("track 1 done")).is_err());
    }
}
