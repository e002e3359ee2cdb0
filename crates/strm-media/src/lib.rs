//! FFmpeg CLI wrapper for transcoding.
//!
//! This crate provides:
//! - FFmpeg command building and cancellable execution
//! - FFprobe media inspection
//! - Output strategies (HLS video, progressive audio, HLS audio)
//! - Master playlist generation
//! - Thumbnail extraction

pub mod command;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod probe;
pub mod progress;
pub mod strategy;
pub mod thumbnail;

pub use command::FfmpegCommand;
pub use error::{MediaError, MediaResult};
pub use executor::{CommandExecutor, FfmpegConfig, FfmpegExecutor};
pub use manifest::{master_manifest, master_manifest_under};
pub use probe::{FfprobeProber, MediaInfo, MediaProber};
pub use progress::FfmpegProgress;
pub use strategy::{content_type_for, AudioOutput, OutputStrategy, RenditionPlan};
pub use thumbnail::{generate_thumbnail, thumbnail_args};
