//! Shared data models for the transcoding pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Queue jobs and their ordering score
//! - Media items and the processing status state machine
//! - Renditions and transcoding profiles

pub mod encoding;
pub mod job;
pub mod media;

// Re-export common types
pub use encoding::{
    default_audio_profiles, default_profiles, default_video_profiles, estimate_bandwidth,
    parse_bitrate, TranscodeProfile,
};
pub use job::{priority_score, Job, JobId, JobKind, DEFAULT_PRIORITY_WEIGHT, MAX_ATTEMPTS};
pub use media::{MediaId, MediaItem, MediaStatus, MediaType, Rendition};

/// Errors raised while interpreting model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown media status: {0}")]
    UnknownStatus(String),
}
