//! The worker supervisor: claim loop, concurrency cap, retry and DLQ
//! routing, graceful shutdown.

use crate::backpressure::AdaptivePollInterval;
use crate::config::WorkerConfig;
use crate::consumer::StreamConsumer;
use crate::error::{ErrorCategory, StreamError};
use crate::metrics::{self, JobOutcome};
use crate::registry::StreamJob;
use crate::resilience::CircuitBreaker;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Processes one claimed job.
///
/// Returning `Err` routes the job through the retry policy: transient and
/// rate-limited errors are re-pushed with backoff until the attempt
/// ceiling, permanent errors and exhausted jobs go to the DLQ. The claimed
/// entry is always acked.
#[async_trait]
pub trait JobProcessor<J: StreamJob>: Send + Sync {
    async fn process(&self, job: &J) -> Result<(), StreamError>;

    /// Processor name for logging.
    fn name(&self) -> &'static str;

    /// Downstream health probe for readiness endpoints.
    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}

/// Generic stream worker.
///
/// Single owner of its claim loop; job handlers run concurrently up to
/// `max_concurrent_jobs`, bounded by a semaphore. An atomic in-flight
/// counter feeds the `exec_in_flight_jobs` gauge and the shutdown drain.
pub struct StreamWorker<J, P>
where
    J: StreamJob,
    P: JobProcessor<J>,
{
    consumer: Arc<StreamConsumer>,
    processor: Arc<P>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    active_jobs: Arc<AtomicUsize>,
    breaker: Option<Arc<CircuitBreaker>>,
    poll: AdaptivePollInterval,
    _phantom: PhantomData<J>,
}

impl<J, P> StreamWorker<J, P>
where
    J: StreamJob,
    P: JobProcessor<J> + 'static,
{
    pub fn new(redis: ConnectionManager, processor: P, config: WorkerConfig) -> Self {
        let consumer = Arc::new(StreamConsumer::new(redis, config.clone()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let poll = AdaptivePollInterval::new(config.poll_interval_ms, config.poll_interval_ms * 30);

        Self {
            consumer,
            processor: Arc::new(processor),
            semaphore,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            breaker: None,
            poll,
            config,
            _phantom: PhantomData,
        }
    }

    /// Attach a circuit breaker. While the circuit is open, claimed jobs
    /// are re-queued unprocessed instead of hammering a failing
    /// downstream.
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(Arc::new(breaker));
        self
    }

    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Run the claim loop until the shutdown flag flips.
    ///
    /// On shutdown the loop stops claiming and waits for in-flight
    /// handlers to finish; the caller wraps this future in its drain
    /// deadline.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            processor = %self.processor.name(),
            max_concurrent_jobs = %self.config.max_concurrent_jobs,
            "Starting stream worker"
        );

        self.consumer.ensure_consumer_group().await?;

        if let Err(e) = self.consumer.claim_all_pending_on_startup().await {
            warn!(error = %e, "Failed to claim pending entries on startup");
        }

        let claim_interval = Duration::from_millis(self.config.claim_idle_ms * 2);
        let mut last_claim = std::time::Instant::now();
        let is_blocking = self.consumer.is_blocking();
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping claim loop");
                break;
            }

            match self.process_batch().await {
                Ok(batch_size) => {
                    consecutive_errors = 0;
                    if batch_size == 0 {
                        self.poll.on_empty();
                    } else if batch_size >= self.config.batch_size {
                        self.poll.on_full_batch();
                    } else {
                        self.poll.on_partial_batch();
                    }
                }
                Err(e) => {
                    if e.is_block_timeout() {
                        self.poll.on_empty();
                        continue;
                    }

                    consecutive_errors += 1;
                    self.poll.on_error();

                    if e.is_nogroup_error() {
                        warn!("Consumer group missing, recreating");
                        if let Err(create_err) = self.consumer.ensure_consumer_group().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                    } else if e.is_connection_error() {
                        warn!(
                            error = %e,
                            consecutive_errors = %consecutive_errors,
                            "Stream store connection error, backing off"
                        );
                    } else {
                        error!(error = %e, "Error processing batch");
                    }

                    tokio::time::sleep(Duration::from_millis(self.poll.current_ms())).await;
                    continue;
                }
            }

            if let Ok(depth) = self.consumer.queue_depth().await {
                metrics::set_queue_depth(&self.config.stream_name, depth as f64);
            }

            if last_claim.elapsed() >= claim_interval {
                if let Err(e) = self.consumer.claim_abandoned().await {
                    debug!(error = %e, "Error claiming abandoned entries");
                }
                last_claim = std::time::Instant::now();
            }

            // Blocking reads already waited inside Redis; in polling mode
            // wait out the adaptive interval, interruptible by shutdown.
            if !is_blocking {
                let sleep = Duration::from_millis(self.poll.current_ms());
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
        }

        // Drain: handlers still hold semaphore permits until they finish
        while self.active_jobs.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!("Stream worker stopped");
        Ok(())
    }

    /// Claim and process one batch; returns the number of claimed jobs.
    async fn process_batch(&self) -> Result<usize, StreamError> {
        let pending = self.consumer.read_pending::<J>().await?;
        let new_entries = self.consumer.read_new::<J>().await?;

        let jobs: Vec<(String, J)> = pending.into_iter().chain(new_entries).collect();
        let total = jobs.len();

        if total == 0 {
            return Ok(0);
        }

        let mut join_set: JoinSet<()> = JoinSet::new();

        for (entry_id, job) in jobs {
            let semaphore = Arc::clone(&self.semaphore);
            let processor = Arc::clone(&self.processor);
            let consumer = Arc::clone(&self.consumer);
            let config = self.config.clone();
            let active_jobs = Arc::clone(&self.active_jobs);
            let breaker = self.breaker.clone();

            join_set.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let current = active_jobs.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::set_in_flight_jobs(&config.stream_name, current as f64);

                Self::handle_entry(
                    &processor, &consumer, &config, &entry_id, &job, breaker, permit,
                )
                .await;

                let current = active_jobs.fetch_sub(1, Ordering::SeqCst) - 1;
                metrics::set_in_flight_jobs(&config.stream_name, current as f64);
            });
        }

        while join_set.join_next().await.is_some() {}

        Ok(total)
    }

    /// Process one claimed entry and route the outcome.
    async fn handle_entry(
        processor: &Arc<P>,
        consumer: &Arc<StreamConsumer>,
        config: &WorkerConfig,
        entry_id: &str,
        job: &J,
        breaker: Option<Arc<CircuitBreaker>>,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        debug!(
            entry_id = %entry_id,
            job_id = %job.job_id(),
            attempt = %job.attempt(),
            "Processing job"
        );

        if let Some(ref breaker) = breaker {
            if !breaker.can_execute() {
                warn!(
                    entry_id = %entry_id,
                    job_id = %job.job_id(),
                    "Circuit open, re-queueing job unprocessed"
                );
                if let Err(e) = consumer.requeue(job).await {
                    error!(error = %e, "Failed to requeue job while circuit open");
                }
                if let Err(e) = consumer.ack(entry_id).await {
                    error!(error = %e, "Failed to ACK entry while circuit open");
                }
                metrics::record_job_processed(&config.stream_name, JobOutcome::Skipped);
                drop(permit);
                return;
            }
        }

        let start = std::time::Instant::now();
        let result = processor.process(job).await;
        metrics::record_job_duration(&config.stream_name, start.elapsed());

        // Processing is done either way; free the concurrency slot before
        // any backoff sleep so retries do not starve the pool.
        drop(permit);

        match result {
            Ok(()) => {
                if let Some(ref breaker) = breaker {
                    breaker.record_success();
                }
                metrics::record_job_processed(&config.stream_name, JobOutcome::Success);

                if let Err(e) = consumer.ack(entry_id).await {
                    error!(entry_id = %entry_id, error = %e, "Failed to ACK entry");
                }
            }
            Err(e) => {
                if let Some(ref breaker) = breaker {
                    breaker.record_failure();
                }

                let category = e.category();
                metrics::record_job_processed(&config.stream_name, JobOutcome::Failed);
                metrics::record_error(&config.stream_name, category_label(category));

                warn!(
                    entry_id = %entry_id,
                    job_id = %job.job_id(),
                    attempt = %job.attempt(),
                    error = %e,
                    category = ?category,
                    "Job processing failed"
                );

                if let Err(handler_err) =
                    Self::route_failure(consumer, config, entry_id, job, &e, category).await
                {
                    error!(
                        entry_id = %entry_id,
                        error = %handler_err,
                        "Failed to route job failure; acking to avoid a stuck pending entry"
                    );
                    let _ = consumer.ack(entry_id).await;
                }
            }
        }
    }

    /// Retry with backoff or dead-letter, then ack the claimed entry.
    async fn route_failure(
        consumer: &Arc<StreamConsumer>,
        config: &WorkerConfig,
        entry_id: &str,
        job: &J,
        error: &StreamError,
        category: ErrorCategory,
    ) -> Result<(), StreamError> {
        if !category.should_retry() {
            metrics::record_job_processed(&config.stream_name, JobOutcome::Dlq);
            consumer.dead_letter(job, &error.to_string()).await?;
            consumer.ack(entry_id).await?;
            return Ok(());
        }

        if job.attempt() >= config.max_attempts {
            warn!(
                job_id = %job.job_id(),
                attempts = %job.attempt(),
                "Job exhausted its attempts, dead-lettering"
            );
            metrics::record_job_processed(&config.stream_name, JobOutcome::Dlq);
            consumer.dead_letter(job, &error.to_string()).await?;
            consumer.ack(entry_id).await?;
            return Ok(());
        }

        let delay = config.backoff.delay_for_attempt(job.attempt());
        let next = job.next_attempt();
        metrics::record_retry(&config.stream_name, next.attempt());

        info!(
            job_id = %job.job_id(),
            next_attempt = %next.attempt(),
            delay_ms = %delay.as_millis(),
            "Scheduling retry with backoff"
        );

        // Ack first so the claimed entry leaves the pending list before
        // the next read; the re-push below is the job's new carrier.
        consumer.ack(entry_id).await?;

        // Detached so the backoff sleep never stalls the claim loop
        let consumer = Arc::clone(consumer);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = consumer.requeue(&next).await {
                error!(job_id = %next.job_id(), error = %e, "Retry requeue failed");
            }
        });

        Ok(())
    }
}

fn category_label(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Transient => "transient",
        ErrorCategory::Permanent => "permanent",
        ErrorCategory::RateLimited => "rate_limited",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct TestJob {
        id: String,
        attempt: u32,
    }

    impl StreamJob for TestJob {
        fn job_id(&self) -> String {
            self.id.clone()
        }

        fn attempt(&self) -> u32 {
            self.attempt
        }

        fn next_attempt(&self) -> Self {
            Self {
                id: self.id.clone(),
                attempt: self.attempt + 1,
            }
        }

        fn to_fields(&self) -> Vec<(String, String)> {
            vec![
                ("id".into(), self.id.clone()),
                ("attempt".into(), self.attempt.to_string()),
            ]
        }

        fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StreamError> {
            Ok(Self {
                id: fields
                    .get("id")
                    .cloned()
                    .ok_or_else(|| StreamError::JobParsing("missing 'id'".into()))?,
                attempt: fields
                    .get("attempt")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            })
        }
    }

    struct NoopProcessor;

    #[async_trait]
    impl JobProcessor<TestJob> for NoopProcessor {
        async fn process(&self, _job: &TestJob) -> Result<(), StreamError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "NoopProcessor"
        }
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(category_label(ErrorCategory::Transient), "transient");
        assert_eq!(category_label(ErrorCategory::Permanent), "permanent");
        assert_eq!(category_label(ErrorCategory::RateLimited), "rate_limited");
    }

    #[tokio::test]
    async fn test_processor_default_health_check() {
        let processor = NoopProcessor;
        assert!(processor.health_check().await.unwrap());
    }

    #[test]
    fn test_job_attempt_progression() {
        let job = TestJob {
            id: "s-1".into(),
            attempt: 1,
        };
        let retried = job.next_attempt();
        assert_eq!(retried.attempt(), 2);
        assert_eq!(retried.job_id(), "s-1");
    }
}
