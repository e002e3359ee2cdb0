//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strm_media::AudioOutput;
use strm_models::encoding::DEFAULT_SEGMENT_DURATION;
use strm_models::{default_audio_profiles, default_video_profiles, MediaType, TranscodeProfile};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent consumer loops
    pub concurrency: usize,
    /// How long one dequeue blocks before the loop re-checks for shutdown
    pub poll_timeout: Duration,
    /// Upper bound on a single job; the transcoder is killed when it expires
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for scratch files
    pub work_dir: PathBuf,
    /// How often in-flight jobs of dead consumers are reclaimed
    pub recovery_interval: Duration,
    /// Minimum time in flight before a job is considered abandoned
    pub recovery_min_idle: Duration,
    /// HLS segment length in seconds
    pub segment_duration: u32,
    /// Bucket receiving published outputs
    pub processed_bucket: String,
    pub video_profiles: Vec<TranscodeProfile>,
    pub audio_profiles: Vec<TranscodeProfile>,
    /// Packaging of audio renditions
    pub audio_output: AudioOutput,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let job_timeout = Duration::from_secs(1800);
        Self {
            concurrency: 4,
            poll_timeout: Duration::from_secs(5),
            job_timeout,
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/strm"),
            recovery_interval: Duration::from_secs(30),
            recovery_min_idle: job_timeout + Duration::from_secs(60),
            segment_duration: DEFAULT_SEGMENT_DURATION,
            processed_bucket: "processed".to_string(),
            video_profiles: default_video_profiles(),
            audio_profiles: default_audio_profiles(),
            audio_output: AudioOutput::Hls,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Fails only on values that are present but malformed.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let job_timeout = Duration::from_secs(env_or("WORKER_JOB_TIMEOUT_SECS", 1800)?);
        let recovery_min_idle = match std::env::var("WORKER_RECOVERY_MIN_IDLE_SECS") {
            Ok(v) => Duration::from_secs(parse_var("WORKER_RECOVERY_MIN_IDLE_SECS", &v)?),
            Err(_) => job_timeout + Duration::from_secs(60),
        };

        let processed_bucket = std::env::var("PROCESSED_BUCKET")
            .or_else(|_| std::env::var("S3_PROCESSED_BUCKET"))
            .unwrap_or(defaults.processed_bucket);

        Ok(Self {
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency)?,
            poll_timeout: Duration::from_secs(env_or("WORKER_POLL_TIMEOUT_SECS", 5)?),
            job_timeout,
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT_SECS", 30)?),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            recovery_interval: Duration::from_secs(env_or("WORKER_RECOVERY_INTERVAL_SECS", 30)?),
            recovery_min_idle,
            segment_duration: env_or("FFMPEG_SEGMENT_DURATION", defaults.segment_duration)?,
            processed_bucket,
            video_profiles: profiles_from_env("VIDEO_PROFILES", defaults.video_profiles)?,
            audio_profiles: profiles_from_env("AUDIO_PROFILES", defaults.audio_profiles)?,
            audio_output: env_or("AUDIO_OUTPUT", defaults.audio_output)?,
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .map(|v| parse_var("METRICS_PORT", &v))
                .transpose()?,
        })
    }

    /// Profiles to produce for a media type, in production order.
    pub fn profiles_for(&self, media_type: MediaType) -> &[TranscodeProfile] {
        match media_type {
            MediaType::Video => &self.video_profiles,
            MediaType::Audio => &self.audio_profiles,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> WorkerResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| WorkerError::config_error(format!("{name} has an invalid value: {value}")))
}

fn env_or<T: FromStr>(name: &str, default: T) -> WorkerResult<T> {
    match std::env::var(name) {
        Ok(value) => parse_var(name, &value),
        Err(_) => Ok(default),
    }
}

fn profiles_from_env(
    name: &str,
    default: Vec<TranscodeProfile>,
) -> WorkerResult<Vec<TranscodeProfile>> {
    match std::env::var(name) {
        Ok(json) => serde_json::from_str(&json)
            .map_err(|e| WorkerError::config_error(format!("{name} is not a profile list: {e}"))),
        Err(_) => Ok(default),
    }
}
