use async_trait::async_trait;

use super::error::JobError;
use crate::infrastructure::queue::JobEnvelope;
use crate::modules::tracks::events::TrackNotice;
use crate::modules::tracks::model::TrackId;
use crate::modules::tracks::repository::TrackTransaction;

/// How a handler classifies one execution of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Work done; the transaction is committed and the notice, if any, sent.
    Success { notice: Option<TrackNotice> },
    RetryableFailure(String),
    FatalFailure(String),
}

impl JobOutcome {
    pub fn success() -> Self {
        JobOutcome::Success { notice: None }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }
}

impl From<JobError> for JobOutcome {
    fn from(e: JobError) -> Self {
        if e.is_retryable() {
            JobOutcome::RetryableFailure(e.to_string())
        } else {
            JobOutcome::FatalFailure(e.to_string())
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The track a job is about, if the payload names one. Used to mark the
    /// track `Processing` on pickup and `Failed` on a fatal outcome.
    fn track_id(&self, _envelope: &JobEnvelope) -> Option<TrackId> {
        None
    }

    /// Runs the job against a transaction the worker owns. The worker
    /// commits it on `Success` and rolls it back otherwise.
    async fn handle(&self, envelope: &JobEnvelope, tx: &mut dyn TrackTransaction) -> JobOutcome;
}
