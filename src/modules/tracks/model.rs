use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type TrackId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TrackStatus {
    /// Stored form in the `track_infos.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Processing => "processing",
            TrackStatus::Done => "done",
            TrackStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackStatus::Done | TrackStatus::Failed)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrackStatus::Pending => "Pending",
            TrackStatus::Processing => "Processing",
            TrackStatus::Done => "Done",
            TrackStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

impl FromStr for TrackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TrackStatus::Pending),
            "processing" => Ok(TrackStatus::Processing),
            "done" => Ok(TrackStatus::Done),
            "failed" => Ok(TrackStatus::Failed),
            other => Err(format!("unknown track status '{}'", other)),
        }
    }
}

/// Audio properties reported by the transcoding backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Kbps.
    #[serde(default)]
    pub bitrate: Option<i32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub channels: Option<i32>,
    #[serde(default)]
    pub sample_rate: Option<i32>,
}

impl TrackMetadata {
    pub fn is_empty(&self) -> bool {
        self == &TrackMetadata::default()
    }

    /// Fields set in `other` win; unset ones keep the current value.
    pub fn merged_with(&self, other: &TrackMetadata) -> TrackMetadata {
        TrackMetadata {
            duration: other.duration.or(self.duration),
            bitrate: other.bitrate.or(self.bitrate),
            format: other.format.clone().or_else(|| self.format.clone()),
            codec: other.codec.clone().or_else(|| self.codec.clone()),
            channels: other.channels.or(self.channels),
            sample_rate: other.sample_rate.or(self.sample_rate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackOwner {
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_id: TrackId,
    pub owner: TrackOwner,
    pub status: TrackStatus,
    pub metadata: Option<TrackMetadata>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            TrackStatus::Pending,
            TrackStatus::Processing,
            TrackStatus::Done,
            TrackStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TrackStatus>(), Ok(status));
        }
        assert!("READY".parse::<TrackStatus>().is_err());
        assert_eq!("DONE".parse::<TrackStatus>(), Ok(TrackStatus::Done));
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(TrackStatus::Done.is_terminal());
        assert!(TrackStatus::Failed.is_terminal());
        assert!(!TrackStatus::Pending.is_terminal());
        assert!(!TrackStatus::Processing.is_terminal());
    }

    #[test]
    fn merge_keeps_existing_fields() {
        let current = TrackMetadata {
            duration: Some(180.0),
            format: Some("mp3".to_string()),
            ..Default::default()
        };
        let update = TrackMetadata {
            bitrate: Some(320),
            format: Some("ogg".to_string()),
            ..Default::default()
        };

        let merged = current.merged_with(&update);
        assert_eq!(merged.duration, Some(180.0));
        assert_eq!(merged.bitrate, Some(320));
        assert_eq!(merged.format.as_deref(), Some("ogg"));
    }
}
