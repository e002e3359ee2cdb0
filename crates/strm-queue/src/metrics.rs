//! Queue metrics.

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    /// Jobs accepted into pending.
    pub const JOBS_ENQUEUED_TOTAL: &str = "strm_jobs_enqueued_total";

    /// Jobs re-enqueued after a failed attempt.
    pub const JOBS_RETRIED_TOTAL: &str = "strm_jobs_retried_total";

    /// Jobs moved to the dead-letter set.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "strm_jobs_dead_lettered_total";

    /// In-flight entries reclaimed from crashed consumers.
    pub const JOBS_RECOVERED_TOTAL: &str = "strm_jobs_recovered_total";

    /// Undecodable records quarantined.
    pub const JOBS_POISONED_TOTAL: &str = "strm_jobs_poisoned_total";

    /// Pending jobs, sampled by the worker.
    pub const QUEUE_DEPTH: &str = "strm_queue_depth";
}

pub fn record_enqueued(kind: &str) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_retried(kind: &str) {
    counter!(names::JOBS_RETRIED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_dead_lettered(kind: &str) {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_recovered(count: u64) {
    counter!(names::JOBS_RECOVERED_TOTAL).increment(count);
}

pub fn record_poisoned() {
    counter!(names::JOBS_POISONED_TOTAL).increment(1);
}

pub fn record_depth(pending: u64, in_flight: u64, dead_letter: u64) {
    gauge!(names::QUEUE_DEPTH, "set" => "pending").set(pending as f64);
    gauge!(names::QUEUE_DEPTH, "set" => "in_flight").set(in_flight as f64);
    gauge!(names::QUEUE_DEPTH, "set" => "dead_letter").set(dead_letter as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::JOBS_ENQUEUED_TOTAL.starts_with("strm_"));
        assert!(names::JOBS_DEAD_LETTERED_TOTAL.ends_with("_total"));
        assert!(names::QUEUE_DEPTH.contains("depth"));
    }
}
