//! Worker error types.

use std::time::Duration;

use strm_storage::StorageError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] strm_metadata::MetadataError),

    #[error("Media error: {0}")]
    Media(#[from] strm_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] strm_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Infrastructure failures may succeed on a later attempt; malformed jobs
    /// and media never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Storage(e) => !matches!(e, StorageError::NotFound(_) | StorageError::ConfigError(_)),
            WorkerError::Metadata(e) => e.is_transient(),
            WorkerError::Queue(e) => e.is_transient(),
            WorkerError::Timeout(_) | WorkerError::Cancelled | WorkerError::Io(_) => true,
            WorkerError::Media(e) => e.is_cancelled(),
            WorkerError::JobFailed(_) | WorkerError::InvalidJob(_) | WorkerError::ConfigError(_) => {
                false
            }
        }
    }

    /// Check if the job was stopped by its cancellation token.
    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Media(e) => e.is_cancelled(),
            WorkerError::Storage(e) => matches!(e, StorageError::Cancelled),
            _ => false,
        }
    }
}
