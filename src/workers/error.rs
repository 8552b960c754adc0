//! Job error types.

use thiserror::Error;

use crate::modules::tracks::repository::StoreError;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    /// Broker or database connectivity, lock contention.
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("invalid payload: {0}")]
    MalformedJob(String),

    #[error("unknown {0}")]
    UnknownEntity(String),

    /// Persistence failures that will not go away on their own.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl JobError {
    pub fn unknown_track(track_id: i64) -> Self {
        Self::UnknownEntity(format!("track {}", track_id))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::TransientInfra(_))
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            JobError::TransientInfra(e.to_string())
        } else {
            JobError::Persistence(e.to_string())
        }
    }
}
