//! External transcoder execution.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress};

/// Lines of FFmpeg diagnostics kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg binary locations.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl FfmpegConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
        }
    }
}

/// Runs the external transcoder.
///
/// `args` excludes the program name. Cancelling `cancel` terminates a
/// running process and yields [`MediaError::Cancelled`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, args: &[String], cancel: &CancellationToken) -> MediaResult<()>;
}

/// Executes FFmpeg as a child process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegExecutor {
    config: FfmpegConfig,
}

impl FfmpegExecutor {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// Resolve the configured binary, failing when it is not installed.
    pub fn check(&self) -> MediaResult<PathBuf> {
        which::which(&self.config.ffmpeg_path)
            .map_err(|e| MediaError::FfmpegNotFound(format!("{}: {}", self.config.ffmpeg_path, e)))
    }
}

#[async_trait]
impl CommandExecutor for FfmpegExecutor {
    async fn execute(&self, args: &[String], cancel: &CancellationToken) -> MediaResult<()> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let program = self.check()?;
        debug!("Running FFmpeg: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;

        // Progress lines are logged; everything else is kept as a bounded tail
        // for the error report.
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut progress = FfmpegProgress::default();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = lines.next_line().await {
                if is_progress_line(&line) {
                    if let Some(snapshot) = parse_progress_line(&line, &mut progress) {
                        debug!(
                            out_time_ms = snapshot.out_time_ms,
                            frame = snapshot.frame,
                            speed = snapshot.speed,
                            "FFmpeg progress"
                        );
                    }
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }

            Vec::from(tail).join("\n")
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                info!("FFmpeg cancelled, killing process");
                child.kill().await.ok();
                reader_handle.abort();
                return Err(MediaError::Cancelled);
            }
        };

        let stderr_tail = reader_handle.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("FFmpeg exited with {}", status),
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                status.code(),
            ))
        }
    }
}
