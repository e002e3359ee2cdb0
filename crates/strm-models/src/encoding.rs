//! Transcoding profiles and bitrate helpers.

use serde::{Deserialize, Serialize};

use crate::media::MediaType;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "h264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default HLS segment duration in seconds
pub const DEFAULT_SEGMENT_DURATION: u32 = 6;

/// Thumbnail generation settings
pub const THUMBNAIL_SCALE_WIDTH: u32 = 480;
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";

/// Bandwidth assumed for renditions with no declared bitrate and an unknown name.
pub const DEFAULT_BANDWIDTH: u64 = 1_000_000;

/// One output quality level.
///
/// Video profiles carry dimensions and a video bitrate; audio profiles only an
/// audio bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    /// Profile name, also the output directory (e.g. "720p", "high")
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// FFmpeg bitrate string, e.g. "2500k"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,

    /// FFmpeg bitrate string, e.g. "128k"
    pub audio_bitrate: String,

    #[serde(default = "default_codec")]
    pub codec: String,
}

fn default_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}

impl TranscodeProfile {
    pub fn video(name: &str, width: u32, height: u32, video_bitrate: &str, audio_bitrate: &str) -> Self {
        Self {
            name: name.to_string(),
            width: Some(width),
            height: Some(height),
            video_bitrate: Some(video_bitrate.to_string()),
            audio_bitrate: audio_bitrate.to_string(),
            codec: DEFAULT_VIDEO_CODEC.to_string(),
        }
    }

    pub fn audio(name: &str, audio_bitrate: &str) -> Self {
        Self {
            name: name.to_string(),
            width: None,
            height: None,
            video_bitrate: None,
            audio_bitrate: audio_bitrate.to_string(),
            codec: DEFAULT_AUDIO_CODEC.to_string(),
        }
    }

    /// Declared bitrate in bits per second.
    ///
    /// The video bitrate for video profiles, the audio bitrate otherwise.
    /// `None` when the configured string cannot be parsed.
    pub fn declared_bitrate(&self) -> Option<u64> {
        match &self.video_bitrate {
            Some(v) => parse_bitrate(v),
            None => parse_bitrate(&self.audio_bitrate),
        }
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

/// Default video ladder, highest quality first.
pub fn default_video_profiles() -> Vec<TranscodeProfile> {
    vec![
        TranscodeProfile::video("1080p", 1920, 1080, "5000k", "192k"),
        TranscodeProfile::video("720p", 1280, 720, "2500k", "128k"),
        TranscodeProfile::video("480p", 854, 480, "1000k", "96k"),
        TranscodeProfile::video("360p", 640, 360, "500k", "64k"),
    ]
}

/// Default audio ladder, highest quality first.
pub fn default_audio_profiles() -> Vec<TranscodeProfile> {
    vec![
        TranscodeProfile::audio("high", "320k"),
        TranscodeProfile::audio("medium", "192k"),
        TranscodeProfile::audio("low", "96k"),
    ]
}

/// Default profiles for a media type.
pub fn default_profiles(media_type: MediaType) -> Vec<TranscodeProfile> {
    match media_type {
        MediaType::Video => default_video_profiles(),
        MediaType::Audio => default_audio_profiles(),
    }
}

/// Parse an FFmpeg-style bitrate ("5000k", "5M", "128000") into bits per second.
pub fn parse_bitrate(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (digits, multiplier) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1_000),
        'm' | 'M' => (&s[..s.len() - 1], 1_000_000),
        _ => (s, 1),
    };

    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

/// Bandwidth guess from a rendition name, used when no bitrate was declared.
pub fn estimate_bandwidth(name: &str) -> u64 {
    match name {
        "1080p" => 5_000_000,
        "720p" => 2_500_000,
        "480p" => 1_000_000,
        "360p" => 500_000,
        "high" => 320_000,
        "medium" => 192_000,
        "low" => 96_000,
        _ => DEFAULT_BANDWIDTH,
    }
}
