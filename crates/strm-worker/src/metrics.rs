//! Worker metrics.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric name constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "strm_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "strm_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "strm_job_duration_seconds";

    /// Wall time of one transcoder run (one profile).
    pub const TRANSCODE_DURATION_SECONDS: &str = "strm_transcode_duration_seconds";
}

/// Serve Prometheus metrics on `0.0.0.0:{port}`.
///
/// Must be called from within the tokio runtime.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {e}")))
}

pub fn record_job_completed(kind: &str, elapsed: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "kind" => kind.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind.to_string(), "outcome" => "completed")
        .record(elapsed.as_secs_f64());
}

pub fn record_job_failed(kind: &str, elapsed: Duration) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind.to_string(), "outcome" => "failed")
        .record(elapsed.as_secs_f64());
}

pub fn record_transcode(profile: &str, strategy: &str, elapsed: Duration) {
    histogram!(
        names::TRANSCODE_DURATION_SECONDS,
        "profile" => profile.to_string(),
        "strategy" => strategy.to_string()
    )
    .record(elapsed.as_secs_f64());
}
