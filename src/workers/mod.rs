//! Queue consumers.

use std::time::Duration;

pub mod error;
pub mod handler;
pub mod registry;
pub mod worker;

pub use error::{JobError, JobResult};
pub use handler::{JobHandler, JobOutcome};
pub use registry::HandlerRegistry;
pub use worker::{StatsSnapshot, Worker, WorkerDeps, WorkerStats};

/// Configuration for a worker bound to one queue.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deliveries per job before a retryable failure is treated as fatal.
    pub max_attempts: u32,
    /// Longest single wait on the broker.
    pub poll_timeout: Duration,
    /// Independent loops consuming the same queue.
    pub concurrency: usize,
    /// Base delay before a retry is published; doubles per attempt.
    pub retry_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_timeout: Duration::from_secs(5),
            concurrency: 1,
            retry_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Delay before retrying after the given (1-based) attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_backoff)
    }
}
