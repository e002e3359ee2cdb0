//! Queue operation interface and configuration.

use std::time::Duration;

use async_trait::async_trait;
use strm_models::{Job, JobId, DEFAULT_PRIORITY_WEIGHT, MAX_ATTEMPTS};
use tokio_util::sync::CancellationToken;

use crate::error::QueueResult;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the queue owns
    pub key_prefix: String,
    /// Delivery attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// Queue age one priority unit is worth
    pub priority_weight: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "strm".to_string(),
            max_attempts: MAX_ATTEMPTS,
            priority_weight: DEFAULT_PRIORITY_WEIGHT,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "strm".to_string()),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(MAX_ATTEMPTS),
            priority_weight: Duration::from_secs(
                std::env::var("QUEUE_PRIORITY_WEIGHT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PRIORITY_WEIGHT.as_secs()),
            ),
        }
    }

    pub fn pending_key(&self) -> String {
        format!("{}:queue:pending", self.key_prefix)
    }

    pub fn in_flight_key(&self) -> String {
        format!("{}:queue:inflight", self.key_prefix)
    }

    pub fn dead_letter_key(&self) -> String {
        format!("{}:queue:dead", self.key_prefix)
    }

    pub fn poison_key(&self) -> String {
        format!("{}:queue:poison", self.key_prefix)
    }

    pub fn sequence_key(&self) -> String {
        format!("{}:queue:seq", self.key_prefix)
    }
}

/// What `nack` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Back in pending with the new attempt count
    Requeued { attempts: u32 },
    /// Retry budget exhausted; stored in the dead-letter set
    DeadLettered { attempts: u32 },
    /// The job was not in flight (already acked, nacked or recovered)
    NotInFlight,
}

/// Operations of a priority-ordered, at-least-once job queue.
///
/// Every operation is safe to call concurrently from many consumers.
/// Storage errors are returned to the caller; implementations do not retry.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job to pending.
    ///
    /// Generates an id when the job has none and stamps `created_at` when it
    /// is unset. Returns the job id.
    async fn enqueue(&self, job: Job) -> QueueResult<JobId>;

    /// Take the lowest-score pending job and mark it in flight.
    ///
    /// Waits up to `timeout`. Returns `Ok(None)` on timeout or when `cancel`
    /// fires before a job becomes available.
    async fn dequeue(&self, timeout: Duration, cancel: &CancellationToken)
        -> QueueResult<Option<Job>>;

    /// Finish a job. Acking a job that is not in flight is a no-op.
    async fn ack(&self, job: &Job) -> QueueResult<()>;

    /// Fail a job: re-enqueue with one more attempt, or dead-letter it once
    /// the retry budget is spent.
    async fn nack(&self, job: &Job) -> QueueResult<NackOutcome>;

    /// Number of pending (not in-flight) jobs.
    async fn len(&self) -> QueueResult<u64>;

    async fn in_flight_len(&self) -> QueueResult<u64>;

    async fn dead_letter_len(&self) -> QueueResult<u64>;

    /// Snapshot of the dead-letter set.
    async fn dead_letters(&self) -> QueueResult<Vec<Job>>;

    /// Nack every in-flight job dequeued more than `min_idle` ago.
    ///
    /// Used to reclaim jobs held by consumers that died. Returns the number of
    /// jobs reclaimed.
    async fn recover_stale(&self, min_idle: Duration) -> QueueResult<usize>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Attempt bookkeeping shared by every implementation.
///
/// Returns the job to store and whether it goes to pending (`true`) or to the
/// dead-letter set (`false`).
pub(crate) fn next_attempt(job: &Job, max_attempts: u32) -> (Job, bool) {
    let mut next = job.clone();
    if job.attempts + 1 < max_attempts {
        next.attempts = job.attempts + 1;
        next.created_at = None;
        (next, true)
    } else {
        next.attempts = max_attempts.max(job.attempts + 1);
        (next, false)
    }
}

/// Fill in the id of a job submitted without one.
pub(crate) fn ensure_id(job: &mut Job) {
    if job.id.is_empty() {
        job.id = JobId::new();
    }
}
