//! FFmpeg command builder.

use std::path::{Path, PathBuf};

/// Builder for FFmpeg argument lists.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Seek to a timestamp before decoding (`HH:MM:SS` or seconds).
    pub fn seek(self, timestamp: impl Into<String>) -> Self {
        self.input_arg("-ss").input_arg(timestamp)
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Scale to exact dimensions.
    pub fn scale(self, width: u32, height: u32) -> Self {
        self.video_filter(format!("scale={}:{}", width, height))
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn video_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:v").output_arg(bitrate)
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Segment into an HLS playlist with every segment listed.
    pub fn hls(self, segment_duration: u32, segment_pattern: impl AsRef<Path>) -> Self {
        self.output_arg("-hls_time")
            .output_arg(segment_duration.to_string())
            .output_arg("-hls_list_size")
            .output_arg("0")
            .output_arg("-hls_segment_filename")
            .output_arg(segment_pattern.as_ref().to_string_lossy().to_string())
            .output_arg("-f")
            .output_arg("hls")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

/// FFmpeg encoder name for a codec label used in profiles.
pub fn encoder_for(codec: &str) -> &str {
    match codec {
        "h264" => "libx264",
        "h265" | "hevc" => "libx265",
        "vp9" => "libvpx-vp9",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("in.mp4", "out/playlist.m3u8")
            .scale(1280, 720)
            .video_codec("libx264")
            .hls(6, "out/segment_%04d.ts");

        let args = cmd.build_args();
        assert_eq!(&args[..6], ["-y", "-v", "error", "-progress", "pipe:2", "-i"]);
        assert_eq!(args[6], "in.mp4");
        assert!(args.windows(2).any(|w| w == ["-vf", "scale=1280:720"]));
        assert!(args.windows(2).any(|w| w == ["-hls_list_size", "0"]));
        assert!(args.windows(2).any(|w| w == ["-f", "hls"]));
        assert_eq!(args.last().unwrap(), "out/playlist.m3u8");
    }

    #[test]
    fn test_seek_goes_before_input() {
        let args = FfmpegCommand::new("in.mp4", "thumb.jpg")
            .seek("00:00:01")
            .single_frame()
            .build_args();

        let seek = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(seek < input);
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(encoder_for("h264"), "libx264");
        assert_eq!(encoder_for("libx264"), "libx264");
        assert_eq!(encoder_for("aac"), "aac");
    }
}
