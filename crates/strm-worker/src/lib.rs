//! Transcoding worker.
//!
//! This crate provides:
//! - The per-job transcoding pipeline
//! - A fixed-size worker pool with graceful drain and abort
//! - Media submission for producers
//! - Stale in-flight recovery and worker metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod submit;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{JobHandler, TranscodePipeline};
pub use pool::WorkerPool;
pub use submit::MediaSubmitter;
