//! Job queue backed by a Redis sorted set.
//!
//! Layout (all keys under `QueueConfig::key_prefix`):
//! - `queue:pending`  ZSET, member = `{seq:020}:{job JSON}`, score = priority score
//! - `queue:seq`      insertion counter; orders members with equal scores
//! - `queue:inflight` HASH, job id -> `{job, dequeued_at}`
//! - `queue:dead`     HASH, job id -> job JSON
//! - `queue:poison`   LIST of undecodable pending members

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strm_models::{priority_score, Job, JobId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::queue::{ensure_id, next_attempt, JobQueue, NackOutcome, QueueConfig};

/// Longest single BZPOPMIN call. Cancellation is observed between calls.
const POP_SLICE: Duration = Duration::from_secs(1);

/// Width of the zero-padded sequence prefixed to pending members.
const SEQ_WIDTH: usize = 20;

/// Add a job to pending behind every member with the same score.
///
/// KEYS: pending, seq
/// ARGV: score, job JSON
const ENQUEUE_SCRIPT: &str = r#"
local seq = redis.call('INCR', KEYS[2])
redis.call('ZADD', KEYS[1], ARGV[1], string.format('%020d', seq) .. ':' .. ARGV[2])
return seq
"#;

/// Atomically remove a job from in-flight and route it to pending or the
/// dead-letter hash. Returns 0 when the job was not in flight.
///
/// KEYS: inflight, pending, dead, seq
/// ARGV: job id, "pending" | "dead", score, job JSON
const SETTLE_SCRIPT: &str = r#"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
    return 0
end
if ARGV[2] == 'pending' then
    local seq = redis.call('INCR', KEYS[4])
    redis.call('ZADD', KEYS[2], ARGV[3], string.format('%020d', seq) .. ':' .. ARGV[4])
else
    redis.call('HSET', KEYS[3], ARGV[1], ARGV[4])
end
return 1
"#;

/// In-flight record.
#[derive(Debug, Serialize, Deserialize)]
struct InFlightEntry {
    job: Job,
    dequeued_at: DateTime<Utc>,
}

/// Redis job queue client.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
    enqueue: redis::Script,
    settle: redis::Script,
}

/// Job JSON of a pending member, without its sequence prefix.
fn member_payload(member: &str) -> &str {
    match member.split_once(':') {
        Some((seq, json)) if seq.len() == SEQ_WIDTH && seq.bytes().all(|b| b.is_ascii_digit()) => {
            json
        }
        _ => member,
    }
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            enqueue: redis::Script::new(ENQUEUE_SCRIPT),
            settle: redis::Script::new(SETTLE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Check connectivity.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Pop the lowest-score member, waiting at most `wait`.
    async fn pop_min(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        wait: Duration,
    ) -> QueueResult<Option<(String, f64)>> {
        let pending = self.config.pending_key();

        if wait.is_zero() {
            let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
                .arg(&pending)
                .arg(1)
                .query_async(conn)
                .await?;
            return Ok(popped.into_iter().next());
        }

        let popped: Option<(String, String, f64)> = redis::cmd("BZPOPMIN")
            .arg(&pending)
            .arg(wait.as_secs_f64())
            .query_async(conn)
            .await?;
        Ok(popped.map(|(_, member, score)| (member, score)))
    }

    /// Record a popped member as in flight.
    async fn claim(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        member: String,
        score: f64,
    ) -> QueueResult<Job> {
        let job: Job = match serde_json::from_str(member_payload(&member)) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Undecodable job record, moving to poison list");
                if let Err(push_err) = redis::cmd("LPUSH")
                    .arg(self.config.poison_key())
                    .arg(&member)
                    .query_async::<()>(conn)
                    .await
                {
                    error!(error = %push_err, record = %member, "Failed to quarantine job record");
                }
                metrics::record_poisoned();
                return Err(QueueError::serialization(e.to_string()));
            }
        };

        let entry = serde_json::to_string(&InFlightEntry {
            job: job.clone(),
            dequeued_at: Utc::now(),
        })?;

        let tracked = redis::cmd("HSET")
            .arg(self.config.in_flight_key())
            .arg(job.id.as_str())
            .arg(&entry)
            .query_async::<()>(conn)
            .await;

        if let Err(e) = tracked {
            warn!(job_id = %job.id, error = %e, "In-flight tracking failed, re-enqueueing job");
            if let Err(restore_err) = redis::cmd("ZADD")
                .arg(self.config.pending_key())
                .arg(score)
                .arg(&member)
                .query_async::<()>(conn)
                .await
            {
                error!(job_id = %job.id, error = %restore_err, "Failed to re-enqueue job after in-flight failure");
            }
            return Err(QueueError::dequeue_failed(format!(
                "in-flight tracking failed for job {}: {}",
                job.id, e
            )));
        }

        Ok(job)
    }

    /// Remove a job from in-flight and route it according to its attempts.
    async fn settle(&self, job: &Job) -> QueueResult<NackOutcome> {
        let (mut next, requeue) = next_attempt(job, self.config.max_attempts);

        let (destination, score) = if requeue {
            let created_at = *next.created_at.get_or_insert_with(Utc::now);
            (
                "pending",
                priority_score(created_at, next.priority, self.config.priority_weight),
            )
        } else {
            ("dead", 0.0)
        };
        let payload = serde_json::to_string(&next)?;

        let mut conn = self.connection().await?;
        let mut invocation = self.settle.prepare_invoke();
        invocation
            .key(self.config.in_flight_key())
            .key(self.config.pending_key())
            .key(self.config.dead_letter_key())
            .key(self.config.sequence_key())
            .arg(job.id.as_str())
            .arg(destination)
            .arg(score)
            .arg(&payload);
        let settled: i64 = invocation.invoke_async(&mut conn).await?;

        if settled == 0 {
            return Ok(NackOutcome::NotInFlight);
        }

        if requeue {
            metrics::record_retried(next.kind.as_str());
            Ok(NackOutcome::Requeued {
                attempts: next.attempts,
            })
        } else {
            metrics::record_dead_lettered(next.kind.as_str());
            warn!(
                job_id = %next.id,
                media_id = %next.subject_id,
                attempts = next.attempts,
                "Moved job to dead-letter set"
            );
            Ok(NackOutcome::DeadLettered {
                attempts: next.attempts,
            })
        }
    }

    /// Number of quarantined records.
    pub async fn poison_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = redis::cmd("LLEN")
            .arg(self.config.poison_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    /// Delete every key the queue owns.
    pub async fn purge(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(self.config.pending_key())
            .arg(self.config.in_flight_key())
            .arg(self.config.dead_letter_key())
            .arg(self.config.poison_key())
            .arg(self.config.sequence_key())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, mut job: Job) -> QueueResult<JobId> {
        ensure_id(&mut job);
        let created_at = *job.created_at.get_or_insert_with(Utc::now);
        let score = priority_score(created_at, job.priority, self.config.priority_weight);
        let member = serde_json::to_string(&job)?;

        let mut conn = self.connection().await?;
        let mut invocation = self.enqueue.prepare_invoke();
        invocation
            .key(self.config.pending_key())
            .key(self.config.sequence_key())
            .arg(score)
            .arg(&member);
        invocation
            .invoke_async::<u64>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        metrics::record_enqueued(job.kind.as_str());
        debug!(
            job_id = %job.id,
            kind = %job.kind,
            priority = job.priority,
            attempts = job.attempts,
            "Enqueued job"
        );

        Ok(job.id)
    }

    async fn dequeue(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> QueueResult<Option<Job>> {
        let deadline = Instant::now() + timeout;
        let mut conn = self.connection().await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some((member, score)) = self.pop_min(&mut conn, remaining.min(POP_SLICE)).await? {
                let job = self.claim(&mut conn, member, score).await?;
                debug!(job_id = %job.id, kind = %job.kind, "Dequeued job");
                return Ok(Some(job));
            }

            if remaining <= POP_SLICE {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let removed: u64 = redis::cmd("HDEL")
            .arg(self.config.in_flight_key())
            .arg(job.id.as_str())
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            debug!(job_id = %job.id, "Ack for job not in flight");
        } else {
            debug!(job_id = %job.id, "Acknowledged job");
        }
        Ok(())
    }

    async fn nack(&self, job: &Job) -> QueueResult<NackOutcome> {
        let outcome = self.settle(job).await?;
        if outcome == NackOutcome::NotInFlight {
            warn!(job_id = %job.id, "Nack for job not in flight, ignoring");
        }
        Ok(outcome)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = redis::cmd("ZCARD")
            .arg(self.config.pending_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn in_flight_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = redis::cmd("HLEN")
            .arg(self.config.in_flight_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn dead_letter_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = redis::cmd("HLEN")
            .arg(self.config.dead_letter_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn dead_letters(&self) -> QueueResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = redis::cmd("HVALS")
            .arg(self.config.dead_letter_key())
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_str::<Job>(&value) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "Skipping undecodable dead-letter record"),
            }
        }
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    async fn recover_stale(&self, min_idle: Duration) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let entries: Vec<(String, String)> = redis::cmd("HGETALL")
            .arg(self.config.in_flight_key())
            .query_async(&mut conn)
            .await?;

        let now = Utc::now();
        let min_idle = chrono::Duration::from_std(min_idle).unwrap_or(chrono::Duration::MAX);
        let mut recovered = 0;

        for (id, raw) in entries {
            let entry: InFlightEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Undecodable in-flight record, moving to poison list");
                    redis::cmd("LPUSH")
                        .arg(self.config.poison_key())
                        .arg(&raw)
                        .query_async::<()>(&mut conn)
                        .await?;
                    redis::cmd("HDEL")
                        .arg(self.config.in_flight_key())
                        .arg(&id)
                        .query_async::<()>(&mut conn)
                        .await?;
                    metrics::record_poisoned();
                    continue;
                }
            };

            if now - entry.dequeued_at < min_idle {
                continue;
            }

            match self.settle(&entry.job).await? {
                NackOutcome::NotInFlight => {}
                outcome => {
                    info!(job_id = %entry.job.id, ?outcome, "Recovered stale in-flight job");
                    recovered += 1;
                }
            }
        }

        if recovered > 0 {
            metrics::record_recovered(recovered as u64);
        }
        Ok(recovered)
    }
}
