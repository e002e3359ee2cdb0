//! Worker pool: a fixed number of consumer loops over one queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strm_models::Job;
use strm_queue::{JobQueue, NackOutcome};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::metrics;
use crate::pipeline::JobHandler;
use crate::retry::FailureTracker;

/// Dequeue failures logged in a row before the loop goes quiet.
const MAX_LOGGED_FAILURES: u32 = 5;

/// Shortest blocking dequeue a consumer will ask for. A zero wait turns the
/// dequeue into a non-blocking poll, which would spin on an empty queue.
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Runs `concurrency` consumer loops feeding a [`JobHandler`].
///
/// Two tokens control shutdown. The token passed to [`WorkerPool::start`]
/// stops new dequeues while jobs in progress run to completion. The pool's
/// own abort token ([`WorkerPool::abort`]) is handed to every running job, so
/// cancelling it kills running transcoders.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_timeout: Duration,
    abort: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_timeout: poll_timeout.max(MIN_POLL_TIMEOUT),
            abort: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(
        config: &WorkerConfig,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self::new(queue, handler, config.concurrency, config.poll_timeout)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Launch the consumer loops and return immediately.
    pub fn start(&self, cancel: CancellationToken) {
        info!(
            "Starting worker pool with {} consumers (poll timeout {:?})",
            self.concurrency, self.poll_timeout
        );

        for worker_id in 0..self.concurrency {
            let consumer = Consumer {
                worker_id,
                queue: Arc::clone(&self.queue),
                handler: Arc::clone(&self.handler),
                poll_timeout: self.poll_timeout,
                abort: self.abort.clone(),
            };
            self.tracker.spawn(consumer.run(cancel.clone()));
        }
    }

    /// Periodically reclaim jobs left in flight by dead consumers.
    ///
    /// Also samples queue depth for metrics. Stops with `cancel`.
    pub fn start_recovery(&self, interval: Duration, min_idle: Duration, cancel: CancellationToken) {
        let queue = Arc::clone(&self.queue);

        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match queue.recover_stale(min_idle).await {
                    Ok(0) => failures.record_success(),
                    Ok(count) => {
                        failures.record_success();
                        info!("Recovered {} stale in-flight jobs", count);
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!("Failed to recover stale jobs: {}", e);
                        }
                    }
                }

                if let (Ok(pending), Ok(in_flight), Ok(dead)) = (
                    queue.len().await,
                    queue.in_flight_len().await,
                    queue.dead_letter_len().await,
                ) {
                    strm_queue::metrics::record_depth(pending, in_flight, dead);
                }
            }

            debug!("Recovery task stopped");
        });
    }

    /// Wait until every loop started on this pool has exited.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancel the execution context of every running job.
    pub fn abort(&self) {
        warn!("Aborting running jobs");
        self.abort.cancel();
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }
}

/// State of one consumer loop.
struct Consumer {
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_timeout: Duration,
    abort: CancellationToken,
}

impl Consumer {
    async fn run(self, cancel: CancellationToken) {
        let worker_id = self.worker_id;
        debug!(worker_id, "Consumer started");

        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        while !cancel.is_cancelled() {
            let job = match self.queue.dequeue(self.poll_timeout, &cancel).await {
                Ok(Some(job)) => {
                    failures.record_success();
                    job
                }
                Ok(None) => {
                    failures.record_success();
                    continue;
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!(worker_id, "Error dequeuing job: {}", e);
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(failures.next_delay()) => {}
                    }
                    continue;
                }
            };

            self.process(job).await;
        }

        debug!(worker_id, "Consumer stopped");
    }

    /// Run one job and settle it with the queue.
    async fn process(&self, job: Job) {
        let worker_id = self.worker_id;
        let kind = job.kind.as_str();
        debug!(worker_id, job_id = %job.id, kind, "Processing job");

        let started = Instant::now();
        let result = self.handler.handle(&job, &self.abort).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                metrics::record_job_completed(kind, elapsed);
                info!(worker_id, job_id = %job.id, kind, ?elapsed, "Job completed");
                if let Err(e) = self.queue.ack(&job).await {
                    error!(worker_id, job_id = %job.id, "Failed to ack job: {}", e);
                }
            }
            Err(err) => {
                metrics::record_job_failed(kind, elapsed);
                match self.queue.nack(&job).await {
                    Ok(NackOutcome::Requeued { attempts }) => warn!(
                        worker_id,
                        job_id = %job.id,
                        attempts,
                        retryable = err.is_retryable(),
                        "Job failed, requeued: {}", err
                    ),
                    Ok(NackOutcome::DeadLettered { attempts }) => error!(
                        worker_id,
                        job_id = %job.id,
                        attempts,
                        "Job failed, moved to dead letter: {}", err
                    ),
                    Ok(NackOutcome::NotInFlight) => warn!(
                        worker_id,
                        job_id = %job.id,
                        "Job failed after it was reclaimed: {}", err
                    ),
                    Err(e) => error!(
                        worker_id,
                        job_id = %job.id,
                        "Job failed ({}) and nack failed: {}", err, e
                    ),
                }
            }
        }
    }
}
