//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::media::{MediaId, MediaType};

/// Maximum number of delivery attempts before a job is dead-lettered.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default weight of one priority unit, in seconds of queue age.
pub const DEFAULT_PRIORITY_WEIGHT: Duration = Duration::from_secs(1000);

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of work a job asks for. Selects the pipeline branch that handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Transcode a video source into HLS renditions
    VideoTranscode,
    /// Transcode an audio source into audio renditions
    AudioTranscode,
    /// Extract a poster frame
    Thumbnail,
    /// Publish audio-only renditions of a video under `{media_id}/audio/`
    AudioExtract,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::VideoTranscode => "video_transcode",
            JobKind::AudioTranscode => "audio_transcode",
            JobKind::Thumbnail => "thumbnail",
            JobKind::AudioExtract => "audio_extract",
        }
    }

    /// Transcode kind matching a media type.
    pub fn transcode_for(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Video => JobKind::VideoTranscode,
            MediaType::Audio => JobKind::AudioTranscode,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of queued work.
///
/// This is also the persisted wire shape: the queue stores the JSON form of
/// this struct as a self-contained value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// What the job does
    pub kind: JobKind,

    /// Media item the job operates on
    pub subject_id: MediaId,

    /// Higher value is processed sooner
    #[serde(default)]
    pub priority: i64,

    /// Job-specific parameters
    #[serde(default)]
    pub payload: BTreeMap<String, String>,

    /// Set by the queue at enqueue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Number of failed delivery attempts so far
    #[serde(default)]
    pub attempts: u32,
}

impl Job {
    /// Create a new job with a generated ID.
    pub fn new(kind: JobKind, subject_id: impl Into<MediaId>) -> Self {
        Self {
            id: JobId::new(),
            kind,
            subject_id: subject_id.into(),
            priority: 0,
            payload: BTreeMap::new(),
            created_at: None,
            attempts: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Add a payload parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Whether another failure would exhaust the retry budget.
    pub fn is_final_attempt(&self, max_attempts: u32) -> bool {
        self.attempts + 1 >= max_attempts
    }

    /// Ordering score; the lowest score is dequeued first.
    ///
    /// Returns `None` until the queue has stamped `created_at`.
    pub fn score(&self, priority_weight: Duration) -> Option<f64> {
        self.created_at
            .map(|created_at| priority_score(created_at, self.priority, priority_weight))
    }
}

/// `created_at - priority * weight`, in milliseconds.
///
/// Jobs enqueued within the same millisecond share a score; queues break
/// those ties by insertion order. The value stays exactly representable as an
/// `f64` (well under 2^53).
pub fn priority_score(created_at: DateTime<Utc>, priority: i64, priority_weight: Duration) -> f64 {
    let weight_ms = priority_weight.as_millis() as i64;
    (created_at.timestamp_millis() - priority.saturating_mul(weight_ms)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_wire_format() {
        let job = Job::new(JobKind::AudioTranscode, "media-1")
            .with_id("job-1")
            .with_priority(5)
            .with_param("source_key", "raw/media-1.mp3");

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["id"], "job-1");
        assert_eq!(value["kind"], "audio_transcode");
        assert_eq!(value["subject_id"], "media-1");
        assert_eq!(value["priority"], 5);
        assert_eq!(value["payload"]["source_key"], "raw/media-1.mp3");
        assert_eq!(value["attempts"], 0);
        assert!(value.get("created_at").is_none());
    }

    #[test]
    fn test_audio_extract_kind_name() {
        let job = Job::new(JobKind::AudioExtract, "media-1");
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], JobKind::AudioExtract.as_str());
        assert_eq!(value["kind"], "audio_extract");
    }

    #[test]
    fn test_higher_priority_scores_lower() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let high = priority_score(now, 5, DEFAULT_PRIORITY_WEIGHT);
        let low = priority_score(now, 1, DEFAULT_PRIORITY_WEIGHT);
        assert!(high < low);
    }

    #[test]
    fn test_priority_dominates_clock_drift() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // Enqueued 999 seconds later but one priority unit higher.
        let later = now + chrono::Duration::seconds(999);
        assert!(
            priority_score(later, 2, DEFAULT_PRIORITY_WEIGHT)
                < priority_score(now, 1, DEFAULT_PRIORITY_WEIGHT)
        );
    }

    #[test]
    fn test_final_attempt() {
        let mut job = Job::new(JobKind::VideoTranscode, "m");
        assert!(!job.is_final_attempt(MAX_ATTEMPTS));
        job.attempts = 2;
        assert!(job.is_final_attempt(MAX_ATTEMPTS));
    }

    #[test]
    fn test_score_requires_created_at() {
        let job = Job::new(JobKind::Thumbnail, "m");
        assert!(job.score(DEFAULT_PRIORITY_WEIGHT).is_none());
    }
}
