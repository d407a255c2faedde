//! Queue error types.

use thiserror::Error;

use adscan_models::JobId;
use adscan_store::StoreError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Another worker took over the job (renewal or fenced write lost).
    #[error("Lease lost on job {0}")]
    LeaseLost(JobId),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, QueueError::LeaseLost(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Store(e) if e.is_retryable())
    }
}
