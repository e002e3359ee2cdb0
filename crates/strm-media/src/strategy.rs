//! Output strategies: how one profile is turned into files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use strm_models::encoding::DEFAULT_AUDIO_CODEC;
use strm_models::{estimate_bandwidth, MediaId, MediaType, Rendition, TranscodeProfile};

use crate::command::{encoder_for, FfmpegCommand};
use crate::error::{MediaError, MediaResult};

/// Playlist file written by the HLS strategies.
pub const PLAYLIST_FILE: &str = "playlist.m3u8";

/// Output file written by the progressive audio strategy.
pub const PROGRESSIVE_AUDIO_FILE: &str = "audio.m4a";

/// How audio sources are packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioOutput {
    /// Segmented HLS renditions
    #[default]
    Hls,
    /// One progressive-download file per rendition
    Progressive,
}

impl FromStr for AudioOutput {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hls" => Ok(AudioOutput::Hls),
            "progressive" => Ok(AudioOutput::Progressive),
            other => Err(MediaError::invalid_media(format!("unknown audio output: {other}"))),
        }
    }
}

/// Output strategy for a transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStrategy {
    /// Scaled H.264/AAC video segmented as HLS
    HlsVideo,
    /// Progressive AAC audio, video dropped
    AudioOnly,
    /// AAC audio segmented as HLS, video dropped
    AudioHls,
}

impl OutputStrategy {
    /// Pick the strategy for a media type.
    pub fn select(media_type: MediaType, audio_output: AudioOutput) -> Self {
        match (media_type, audio_output) {
            (MediaType::Video, _) => OutputStrategy::HlsVideo,
            (MediaType::Audio, AudioOutput::Hls) => OutputStrategy::AudioHls,
            (MediaType::Audio, AudioOutput::Progressive) => OutputStrategy::AudioOnly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStrategy::HlsVideo => "hls_video",
            OutputStrategy::AudioOnly => "audio_only",
            OutputStrategy::AudioHls => "audio_hls",
        }
    }

    fn manifest_file(&self) -> &'static str {
        match self {
            OutputStrategy::HlsVideo | OutputStrategy::AudioHls => PLAYLIST_FILE,
            OutputStrategy::AudioOnly => PROGRESSIVE_AUDIO_FILE,
        }
    }

    fn segment_extension(&self) -> Option<&'static str> {
        match self {
            OutputStrategy::HlsVideo => Some("ts"),
            OutputStrategy::AudioHls => Some("aac"),
            OutputStrategy::AudioOnly => None,
        }
    }

    /// Plan the transcode of `input` for one profile into `output_root/{profile}`.
    pub fn plan(
        &self,
        profile: &TranscodeProfile,
        input: &Path,
        output_root: &Path,
        segment_duration: u32,
    ) -> MediaResult<RenditionPlan> {
        let dir = output_root.join(&profile.name);
        let manifest = dir.join(self.manifest_file());

        let cmd = FfmpegCommand::new(input, &manifest);
        let cmd = match self {
            OutputStrategy::HlsVideo => {
                let (width, height) = profile.resolution().ok_or_else(|| {
                    MediaError::invalid_media(format!("profile {} has no resolution", profile.name))
                })?;
                let video_bitrate = profile.video_bitrate.as_deref().ok_or_else(|| {
                    MediaError::invalid_media(format!("profile {} has no video bitrate", profile.name))
                })?;
                cmd.scale(width, height)
                    .video_codec(encoder_for(&profile.codec))
                    .video_bitrate(video_bitrate)
                    .audio_codec(DEFAULT_AUDIO_CODEC)
                    .audio_bitrate(&profile.audio_bitrate)
            }
            OutputStrategy::AudioOnly | OutputStrategy::AudioHls => cmd
                .no_video()
                .audio_codec(DEFAULT_AUDIO_CODEC)
                .audio_bitrate(&profile.audio_bitrate),
        };
        let cmd = match self.segment_extension() {
            Some(ext) => cmd.hls(segment_duration, dir.join(format!("segment_%04d.{ext}"))),
            None => cmd,
        };

        Ok(RenditionPlan {
            strategy: *self,
            profile: profile.clone(),
            args: cmd.build_args(),
            dir,
            manifest,
        })
    }
}

impl fmt::Display for OutputStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A planned transcode of one profile.
#[derive(Debug, Clone)]
pub struct RenditionPlan {
    pub strategy: OutputStrategy,
    pub profile: TranscodeProfile,
    /// FFmpeg arguments
    pub args: Vec<String>,
    /// Directory receiving the profile's files
    pub dir: PathBuf,
    /// Playlist, or the single output file
    pub manifest: PathBuf,
}

impl RenditionPlan {
    /// Files produced by the transcode, segments first and the manifest last.
    ///
    /// Fails when the manifest was not written.
    pub async fn outputs(&self) -> MediaResult<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.manifest).await? {
            return Err(MediaError::MissingOutput(self.manifest.clone()));
        }

        let mut segments = Vec::new();
        if let Some(ext) = self.strategy.segment_extension() {
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                    segments.push(path);
                }
            }
            segments.sort();
        }

        segments.push(self.manifest.clone());
        Ok(segments)
    }

    /// Object key for a produced file.
    pub fn object_key(&self, media_id: &MediaId, file: &Path) -> String {
        self.object_key_under(media_id.as_str(), file)
    }

    /// Object key for a produced file published below `root`.
    pub fn object_key_under(&self, root: &str, file: &Path) -> String {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}/{}/{}", root, self.profile.name, name)
    }

    /// Rendition record for the published outputs.
    pub fn rendition(&self, media_id: &MediaId) -> Rendition {
        self.rendition_under(media_id.as_str())
    }

    /// Rendition record for outputs published below `root`.
    pub fn rendition_under(&self, root: &str) -> Rendition {
        let prefix = format!("{}/{}", root, self.profile.name);
        let codec = match self.strategy {
            OutputStrategy::HlsVideo => self.profile.codec.clone(),
            OutputStrategy::AudioOnly | OutputStrategy::AudioHls => DEFAULT_AUDIO_CODEC.to_string(),
        };

        Rendition {
            name: self.profile.name.clone(),
            width: self.profile.width.filter(|_| self.strategy == OutputStrategy::HlsVideo),
            height: self.profile.height.filter(|_| self.strategy == OutputStrategy::HlsVideo),
            bitrate: self
                .profile
                .declared_bitrate()
                .unwrap_or_else(|| estimate_bandwidth(&self.profile.name)),
            codec,
            manifest_key: format!("{}/{}", prefix, self.strategy.manifest_file()),
            segment_prefix: self
                .strategy
                .segment_extension()
                .map(|_| format!("{}/segment_", prefix)),
        }
    }
}

/// Content type for a published file.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/x-mpegURL",
        Some("ts") => "video/MP2T",
        Some("aac") => "audio/aac",
        Some("m4a") => "audio/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strm_models::{default_audio_profiles, default_video_profiles};

    fn has_pair(args: &[String], a: &str, b: &str) -> bool {
        args.windows(2).any(|w| w[0] == a && w[1] == b)
    }

    #[test]
    fn test_select() {
        assert_eq!(
            OutputStrategy::select(MediaType::Video, AudioOutput::Progressive),
            OutputStrategy::HlsVideo
        );
        assert_eq!(
            OutputStrategy::select(MediaType::Audio, AudioOutput::Hls),
            OutputStrategy::AudioHls
        );
        assert_eq!(
            OutputStrategy::select(MediaType::Audio, AudioOutput::Progressive),
            OutputStrategy::AudioOnly
        );
    }

    #[test]
    fn test_hls_video_plan() {
        let profile = &default_video_profiles()[1];
        let plan = OutputStrategy::HlsVideo
            .plan(profile, Path::new("/w/source"), Path::new("/w/out"), 6)
            .unwrap();

        assert_eq!(plan.dir, Path::new("/w/out/720p"));
        assert_eq!(plan.manifest, Path::new("/w/out/720p/playlist.m3u8"));
        assert!(has_pair(&plan.args, "-vf", "scale=1280:720"));
        assert!(has_pair(&plan.args, "-c:v", "libx264"));
        assert!(has_pair(&plan.args, "-b:v", "2500k"));
        assert!(has_pair(&plan.args, "-b:a", "128k"));
        assert!(has_pair(&plan.args, "-hls_time", "6"));
        assert!(has_pair(&plan.args, "-hls_segment_filename", "/w/out/720p/segment_%04d.ts"));
        assert_eq!(plan.args.last().unwrap(), "/w/out/720p/playlist.m3u8");
    }

    #[test]
    fn test_audio_plans() {
        let profile = &default_audio_profiles()[0];

        let hls = OutputStrategy::AudioHls
            .plan(profile, Path::new("/in"), Path::new("/out"), 10)
            .unwrap();
        assert!(hls.args.contains(&"-vn".to_string()));
        assert!(has_pair(&hls.args, "-hls_segment_filename", "/out/high/segment_%04d.aac"));

        let progressive = OutputStrategy::AudioOnly
            .plan(profile, Path::new("/in"), Path::new("/out"), 10)
            .unwrap();
        assert!(!progressive.args.contains(&"-hls_time".to_string()));
        assert_eq!(progressive.args.last().unwrap(), "/out/high/audio.m4a");
    }

    #[test]
    fn test_video_plan_requires_resolution() {
        let profile = TranscodeProfile::audio("high", "320k");
        let err = OutputStrategy::HlsVideo
            .plan(&profile, Path::new("/in"), Path::new("/out"), 6)
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }

    #[test]
    fn test_rendition_records() {
        let id = MediaId::from("m1");

        let video = OutputStrategy::HlsVideo
            .plan(&default_video_profiles()[0], Path::new("/in"), Path::new("/out"), 6)
            .unwrap()
            .rendition(&id);
        assert_eq!(video.name, "1080p");
        assert_eq!((video.width, video.height), (Some(1920), Some(1080)));
        assert_eq!(video.bitrate, 5_000_000);
        assert_eq!(video.manifest_key, "m1/1080p/playlist.m3u8");
        assert_eq!(video.segment_prefix.as_deref(), Some("m1/1080p/segment_"));

        let audio = OutputStrategy::AudioOnly
            .plan(&default_audio_profiles()[2], Path::new("/in"), Path::new("/out"), 6)
            .unwrap()
            .rendition(&id);
        assert_eq!(audio.bitrate, 96_000);
        assert_eq!(audio.codec, "aac");
        assert_eq!(audio.manifest_key, "m1/low/audio.m4a");
        assert!(audio.segment_prefix.is_none());
    }

    #[test]
    fn test_keys_under_nested_root() {
        let plan = OutputStrategy::AudioHls
            .plan(&default_audio_profiles()[0], Path::new("/in"), Path::new("/out"), 6)
            .unwrap();

        assert_eq!(
            plan.object_key_under("m1/audio", Path::new("/out/high/segment_0003.aac")),
            "m1/audio/high/segment_0003.aac"
        );
        let rendition = plan.rendition_under("m1/audio");
        assert_eq!(rendition.manifest_key, "m1/audio/high/playlist.m3u8");
        assert_eq!(rendition.segment_prefix.as_deref(), Some("m1/audio/high/segment_"));
    }

    #[tokio::test]
    async fn test_outputs_segments_then_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let plan = OutputStrategy::AudioHls
            .plan(&default_audio_profiles()[1], Path::new("/in"), dir.path(), 6)
            .unwrap();

        tokio::fs::create_dir_all(&plan.dir).await.unwrap();
        assert!(matches!(plan.outputs().await, Err(MediaError::MissingOutput(_))));

        for name in ["segment_0001.aac", "segment_0000.aac", "playlist.m3u8", "stray.log"] {
            tokio::fs::write(plan.dir.join(name), b"x").await.unwrap();
        }

        let outputs = plan.outputs().await.unwrap();
        let names: Vec<_> = outputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["segment_0000.aac", "segment_0001.aac", "playlist.m3u8"]);

        let id = MediaId::from("m1");
        assert_eq!(plan.object_key(&id, &outputs[0]), "m1/medium/segment_0000.aac");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a/playlist.m3u8")), "application/x-mpegURL");
        assert_eq!(content_type_for(Path::new("a/segment_0000.ts")), "video/MP2T");
        assert_eq!(content_type_for(Path::new("a/segment_0000.aac")), "audio/aac");
        assert_eq!(content_type_for(Path::new("thumbnail.jpg")), "image/jpeg");
    }
}
