//! Media item models and the processing status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// File extensions recognised as video sources.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "m4v"];

/// File extensions recognised as audio sources.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aac", "wav", "flac", "ogg", "m4a", "wma", "opus"];

/// Unique identifier for a media item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    /// Generate a new random media ID.
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

    /// Object key of the aggregate (master) manifest.
    pub fn master_manifest_key(&self) -> String {
        format!("{}/master.m3u8", self.0)
    }

    pub fn thumbnail_key(&self) -> String {
        format!("{}/thumbnail.jpg", self.0)
    }

    /// Root of the audio renditions extracted from a video.
    pub fn audio_root(&self) -> String {
        format!("{}/audio", self.0)
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MediaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MediaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of media content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }

    /// Detect the media type from a file name's extension.
    ///
    /// Unknown or missing extensions are treated as video.
    pub fn from_filename(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some(e) if AUDIO_EXTENSIONS.contains(&e) => MediaType::Audio,
            _ => MediaType::Video,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of a media item.
///
/// ```text
/// pending ──▶ processing ──▶ completed
///                 │  ▲
///                 ▼  │
///               failed
/// ```
///
/// `failed` may re-enter `processing` when a retried job picks the item up
/// again. `completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    /// Submitted, waiting for a worker
    #[default]
    Pending,
    /// A worker is running the pipeline
    Processing,
    /// All renditions published
    Completed,
    /// The last pipeline run failed
    Failed,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Pending => "pending",
            MediaStatus::Processing => "processing",
            MediaStatus::Completed => "completed",
            MediaStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: MediaStatus) -> bool {
        use MediaStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Pending, Failed)
                | (Processing, Failed)
                | (Failed, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaStatus::Completed)
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MediaStatus {
    type Err = crate::ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MediaStatus::Pending),
            "processing" => Ok(MediaStatus::Processing),
            "completed" => Ok(MediaStatus::Completed),
            "failed" => Ok(MediaStatus::Failed),
            other => Err(crate::ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// One produced quality level of a media item. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Profile name (e.g. "720p", "high")
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Declared bitrate in bits per second
    pub bitrate: u64,

    pub codec: String,

    /// Object key of the rendition's manifest (or single output file)
    pub manifest_key: String,

    /// Object key prefix shared by the rendition's segments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_prefix: Option<String>,
}

/// A media item and the state the pipeline advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Unique media ID
    pub id: MediaId,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default)]
    pub media_type: MediaType,

    /// Processing status
    #[serde(default)]
    pub status: MediaStatus,

    /// Bucket holding the uploaded source
    #[serde(default)]
    pub source_bucket: String,

    /// Object key of the uploaded source
    #[serde(default)]
    pub source_key: String,

    #[serde(default)]
    pub source_size: u64,

    /// Produced renditions, in profile order
    #[serde(default)]
    pub renditions: Vec<Rendition>,

    /// Probed duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Owner (uploader)
    #[serde(default)]
    pub owner_id: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set on the transition into `completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Create a new pending media item.
    pub fn new(
        id: impl Into<MediaId>,
        title: impl Into<String>,
        owner_id: impl Into<String>,
        media_type: MediaType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            media_type,
            status: MediaStatus::Pending,
            source_bucket: String::new(),
            source_key: String::new(),
            source_size: 0,
            renditions: Vec::new(),
            duration: None,
            tags: BTreeMap::new(),
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Set the uploaded source location.
    pub fn with_source(mut self, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        self.source_bucket = bucket.into();
        self.source_key = key.into();
        self
    }

    /// Processed successfully and playable.
    pub fn is_processed(&self) -> bool {
        self.status == MediaStatus::Completed && !self.renditions.is_empty()
    }

    pub fn master_manifest_key(&self) -> String {
        self.id.master_manifest_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_detection() {
        assert_eq!(MediaType::from_filename("clip.MP4"), MediaType::Video);
        assert_eq!(MediaType::from_filename("song.flac"), MediaType::Audio);
        assert_eq!(MediaType::from_filename("voice.opus"), MediaType::Audio);
        assert_eq!(MediaType::from_filename("noext"), MediaType::Video);
        assert_eq!(MediaType::from_filename("weird.xyz"), MediaType::Video);
    }

    #[test]
    fn test_status_transitions() {
        use MediaStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            MediaStatus::Pending,
            MediaStatus::Processing,
            MediaStatus::Completed,
            MediaStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MediaStatus>().unwrap(), status);
        }
        assert!("done".parse::<MediaStatus>().is_err());
    }

    #[test]
    fn test_keys() {
        let id = MediaId::from("abc");
        assert_eq!(id.master_manifest_key(), "abc/master.m3u8");
        assert_eq!(id.thumbnail_key(), "abc/thumbnail.jpg");
        assert_eq!(id.audio_root(), "abc/audio");
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = MediaItem::new("m1", "Title", "user-1", MediaType::Audio);
        assert_eq!(item.status, MediaStatus::Pending);
        assert!(item.renditions.is_empty());
        assert!(item.processed_at.is_none());
        assert!(!item.is_processed());

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["status"], "pending");
    }
}
