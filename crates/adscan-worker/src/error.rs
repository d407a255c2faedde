//! Worker error types.

use thiserror::Error;

use adscan_media::MediaError;
use adscan_ml_client::MlError;
use adscan_models::{JobId, StageName};
use adscan_queue::QueueError;
use adscan_storage::StorageError;
use adscan_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

pub type StageResult<T> = Result<T, StageError>;

/// Failure reported by an analyzer adapter.
///
/// Adapters never retry; the coordinator decides based on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Network blips, rate limits, overloaded inference. Worth another attempt.
    #[error("{0}")]
    Transient(String),

    /// Invalid input, removed content, malformed media.
    #[error("{0}")]
    Permanent(String),
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Transient(msg) | StageError::Permanent(msg) => msg,
        }
    }

    /// The same cause, no longer retryable.
    pub fn into_permanent(self) -> Self {
        match self {
            StageError::Transient(msg) => StageError::Permanent(msg),
            permanent => permanent,
        }
    }
}

impl From<MediaError> for StageError {
    fn from(e: MediaError) -> Self {
        if e.is_permanent() {
            StageError::Permanent(e.to_string())
        } else {
            StageError::Transient(e.to_string())
        }
    }
}

impl From<MlError> for StageError {
    fn from(e: MlError) -> Self {
        if e.is_transient() {
            StageError::Transient(e.to_string())
        } else {
            StageError::Permanent(e.to_string())
        }
    }
}

impl From<StorageError> for StageError {
    fn from(e: StorageError) -> Self {
        if e.is_retryable() {
            StageError::Transient(e.to_string())
        } else {
            StageError::Permanent(e.to_string())
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Transient(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A stage exhausted its retries or failed permanently.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: StageName,
        #[source]
        source: StageError,
    },

    /// The job was reclaimed but cannot resume.
    #[error("orphan reclaim failed: {0}")]
    OrphanReclaim(String),

    /// Another worker owns the job now.
    #[error("Lease lost for job {0}")]
    LeaseLost(JobId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("ML service error: {0}")]
    Ml(#[from] MlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn stage(stage: StageName, source: StageError) -> Self {
        Self::Stage { stage, source }
    }

    pub fn orphan_reclaim(msg: impl Into<String>) -> Self {
        Self::OrphanReclaim(msg.into())
    }

    /// Ends the job as `failed`.
    pub fn is_terminal_for_job(&self) -> bool {
        matches!(self, WorkerError::Stage { .. } | WorkerError::OrphanReclaim(_))
    }
}

impl From<QueueError> for WorkerError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::LeaseLost(id) => WorkerError::LeaseLost(id),
            other => WorkerError::Queue(other),
        }
    }
}
