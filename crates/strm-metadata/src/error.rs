//! Metadata store error types.

use strm_models::{MediaId, MediaStatus};
use thiserror::Error;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Media not found: {0}")]
    NotFound(MediaId),

    #[error("Media already exists: {0}")]
    AlreadyExists(MediaId),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MediaId,
        from: MediaStatus,
        to: MediaStatus,
    },

    #[error("Media {0} cannot complete without renditions")]
    NoRenditions(MediaId),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Corrupt record for {id}: {message}")]
    Corrupt { id: MediaId, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetadataError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn corrupt(id: &MediaId, msg: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.clone(),
            message: msg.into(),
        }
    }

    /// Storage-level failure that the caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            MetadataError::ConnectionFailed(_) => true,
            MetadataError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}
