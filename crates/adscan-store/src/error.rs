//! Job store error types.

use thiserror::Error;

use adscan_models::{JobId, JobStatus, TransitionError};

/// Result type for job store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Compare-and-swap lost: the job changed under us or is terminal.
    #[error("Stale job: {0}")]
    Stale(String),

    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store contention on job {0}, giving up")]
    Contention(JobId),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(id: &JobId) -> Self {
        Self::NotFound(id.clone())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::Stale(msg.into())
    }

    /// True if a concurrent owner won the race (the caller should abandon the job).
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::Stale(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Backend failures worth retrying (connection blips, contention).
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Contention(_) => true,
            StoreError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

impl From<TransitionError> for StoreError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Stale { .. } => StoreError::Stale(err.to_string()),
            TransitionError::InvalidTransition { from, to } => StoreError::InvalidTransition { from, to },
            TransitionError::MissingField { .. } => StoreError::InvalidInput(err.to_string()),
        }
    }
}
