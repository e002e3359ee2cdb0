//! In-process job queue.
//!
//! Same ordering, visibility and dead-letter semantics as the Redis queue,
//! without durability. Used by tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use strm_models::{priority_score, Job, JobId};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::queue::{ensure_id, next_attempt, JobQueue, NackOutcome, QueueConfig};

/// Pending order: score, then insertion sequence.
type PendingKey = (i64, u64);

#[derive(Default)]
struct State {
    pending: BTreeMap<PendingKey, Job>,
    in_flight: HashMap<JobId, (Job, Instant)>,
    dead_letter: BTreeMap<JobId, Job>,
    seq: u64,
}

impl State {
    fn push(&mut self, job: Job, score: f64) {
        self.seq += 1;
        self.pending.insert((score as i64, self.seq), job);
    }
}

/// In-memory job queue.
pub struct MemoryJobQueue {
    config: QueueConfig,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| QueueError::connection_failed("queue state lock poisoned"))
    }

    fn stamp(&self, job: &mut Job) -> f64 {
        ensure_id(job);
        let created_at = *job.created_at.get_or_insert_with(Utc::now);
        priority_score(created_at, job.priority, self.config.priority_weight)
    }

    fn try_claim(&self) -> QueueResult<Option<Job>> {
        let mut state = self.lock()?;
        let Some((_, job)) = state.pending.pop_first() else {
            return Ok(None);
        };
        state
            .in_flight
            .insert(job.id.clone(), (job.clone(), Instant::now()));
        Ok(Some(job))
    }

    fn settle(&self, job: &Job) -> QueueResult<NackOutcome> {
        let (mut next, requeue) = next_attempt(job, self.config.max_attempts);
        let mut state = self.lock()?;

        if state.in_flight.remove(&job.id).is_none() {
            return Ok(NackOutcome::NotInFlight);
        }

        if requeue {
            let score = self.stamp(&mut next);
            let attempts = next.attempts;
            metrics::record_retried(next.kind.as_str());
            state.push(next, score);
            drop(state);
            self.notify.notify_waiters();
            Ok(NackOutcome::Requeued { attempts })
        } else {
            let attempts = next.attempts;
            metrics::record_dead_lettered(next.kind.as_str());
            warn!(
                job_id = %next.id,
                media_id = %next.subject_id,
                attempts,
                "Moved job to dead-letter set"
            );
            state.dead_letter.insert(next.id.clone(), next);
            Ok(NackOutcome::DeadLettered { attempts })
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, mut job: Job) -> QueueResult<JobId> {
        let score = self.stamp(&mut job);
        let id = job.id.clone();
        metrics::record_enqueued(job.kind.as_str());
        debug!(job_id = %id, kind = %job.kind, priority = job.priority, "Enqueued job");

        self.lock()?.push(job, score);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn dequeue(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> QueueResult<Option<Job>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wakeups before looking, so an enqueue between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(job) = self.try_claim()? {
                debug!(job_id = %job.id, kind = %job.kind, "Dequeued job");
                return Ok(Some(job));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    async fn ack(&self, job: &Job) -> QueueResult<()> {
        if self.lock()?.in_flight.remove(&job.id).is_some() {
            debug!(job_id = %job.id, "Acknowledged job");
        } else {
            debug!(job_id = %job.id, "Ack for job not in flight");
        }
        Ok(())
    }

    async fn nack(&self, job: &Job) -> QueueResult<NackOutcome> {
        let outcome = self.settle(job)?;
        if outcome == NackOutcome::NotInFlight {
            warn!(job_id = %job.id, "Nack for job not in flight, ignoring");
        }
        Ok(outcome)
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.lock()?.pending.len() as u64)
    }

    async fn in_flight_len(&self) -> QueueResult<u64> {
        Ok(self.lock()?.in_flight.len() as u64)
    }

    async fn dead_letter_len(&self) -> QueueResult<u64> {
        Ok(self.lock()?.dead_letter.len() as u64)
    }

    async fn dead_letters(&self) -> QueueResult<Vec<Job>> {
        Ok(self.lock()?.dead_letter.values().cloned().collect())
    }

    async fn recover_stale(&self, min_idle: Duration) -> QueueResult<usize> {
        let stale: Vec<Job> = self
            .lock()?
            .in_flight
            .values()
            .filter(|(_, dequeued_at)| dequeued_at.elapsed() >= min_idle)
            .map(|(job, _)| job.clone())
            .collect();

        let mut recovered = 0;
        for job in stale {
            let outcome = self.settle(&job)?;
            if outcome != NackOutcome::NotInFlight {
                info!(job_id = %job.id, ?outcome, "Recovered stale in-flight job");
                recovered += 1;
            }
        }

        if recovered > 0 {
            metrics::record_recovered(recovered as u64);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strm_models::{JobKind, MAX_ATTEMPTS};

    const SHORT: Duration = Duration::from_millis(50);

    fn job(id: &str, priority: i64) -> Job {
        Job::new(JobKind::VideoTranscode, format!("media-{id}"))
            .with_id(id)
            .with_priority(priority)
    }

    async fn take(queue: &MemoryJobQueue) -> Job {
        queue
            .dequeue(SHORT, &CancellationToken::new())
            .await
            .unwrap()
            .expect("a pending job")
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("j1", 5)).await.unwrap();
        queue.enqueue(job("j2", 1)).await.unwrap();
        queue.enqueue(job("j3", 5)).await.unwrap();

        assert_eq!(take(&queue).await.id.as_str(), "j1");
        assert_eq!(take(&queue).await.id.as_str(), "j3");
        assert_eq!(take(&queue).await.id.as_str(), "j2");
    }

    #[tokio::test]
    async fn test_distinct_priorities_dequeue_non_increasing() {
        let queue = MemoryJobQueue::default();
        for (i, p) in [3, -2, 7, 0, 5, 1].into_iter().enumerate() {
            queue.enqueue(job(&format!("j{i}"), p)).await.unwrap();
        }

        let mut seen = Vec::new();
        while let Some(job) = queue.dequeue(SHORT, &CancellationToken::new()).await.unwrap() {
            seen.push(job.priority);
        }
        assert_eq!(seen, vec![7, 5, 3, 1, 0, -2]);
    }

    #[tokio::test]
    async fn test_dequeue_moves_job_in_flight() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("j1", 0)).await.unwrap();

        let job = take(&queue).await;
        assert!(job.created_at.is_some());
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.in_flight_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_empty() {
        let queue = MemoryJobQueue::default();
        let started = Instant::now();
        let result = queue.dequeue(SHORT, &CancellationToken::new()).await.unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= SHORT);
    }

    #[tokio::test]
    async fn test_dequeue_returns_on_cancel() {
        let queue = MemoryJobQueue::default();
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let handle = tokio::spawn(async move {
            cancel.cancel();
        });
        let result = queue
            .dequeue(Duration::from_secs(30), &child)
            .await
            .unwrap();
        handle.await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryJobQueue::default());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .dequeue(Duration::from_secs(5), &CancellationToken::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(job("late", 0)).await.unwrap();

        let job = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(job.id.as_str(), "late");
    }

    #[tokio::test]
    async fn test_ack_twice_is_noop() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("j1", 0)).await.unwrap();
        let job = take(&queue).await;

        queue.ack(&job).await.unwrap();
        queue.ack(&job).await.unwrap();
        assert_eq!(queue.in_flight_len().await.unwrap(), 0);
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.dead_letter_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nack_below_budget_requeues() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("j1", 0)).await.unwrap();
        let job = take(&queue).await;

        let outcome = queue.nack(&job).await.unwrap();
        assert_eq!(outcome, NackOutcome::Requeued { attempts: 1 });
        assert_eq!(queue.dead_letter_len().await.unwrap(), 0);

        let again = take(&queue).await;
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test]
    async fn test_nack_on_last_attempt_dead_letters() {
        let queue = MemoryJobQueue::default();
        let mut last = job("j1", 0);
        last.attempts = MAX_ATTEMPTS - 1;
        queue.enqueue(last).await.unwrap();
        let job = take(&queue).await;

        let outcome = queue.nack(&job).await.unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered { attempts: MAX_ATTEMPTS });
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.dead_letter_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_dead_letter() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("poison", 0)).await.unwrap();

        for _ in 0..MAX_ATTEMPTS {
            let job = take(&queue).await;
            queue.nack(&job).await.unwrap();
        }

        assert!(queue.is_empty().await.unwrap());
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id.as_str(), "poison");
        assert_eq!(dead[0].attempts, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retry_goes_behind_newer_jobs() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("first", 0)).await.unwrap();
        let failed = take(&queue).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.enqueue(job("second", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.nack(&failed).await.unwrap();

        assert_eq!(take(&queue).await.id.as_str(), "second");
        assert_eq!(take(&queue).await.id.as_str(), "first");
    }

    #[tokio::test]
    async fn test_nack_after_ack_is_ignored() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("j1", 0)).await.unwrap();
        let job = take(&queue).await;
        queue.ack(&job).await.unwrap();

        assert_eq!(queue.nack(&job).await.unwrap(), NackOutcome::NotInFlight);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recover_stale_consumes_an_attempt() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("j1", 0)).await.unwrap();
        let _held = take(&queue).await;

        assert_eq!(queue.recover_stale(Duration::from_secs(60)).await.unwrap(), 0);
        assert_eq!(queue.recover_stale(Duration::ZERO).await.unwrap(), 1);

        assert_eq!(queue.in_flight_len().await.unwrap(), 0);
        let again = take(&queue).await;
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test]
    async fn test_enqueue_generates_missing_id() {
        let queue = MemoryJobQueue::default();
        let id = queue
            .enqueue(job("", 0))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(take(&queue).await.id, id);
    }
}
