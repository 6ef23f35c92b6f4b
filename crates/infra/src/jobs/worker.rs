//! Queue worker: claims jobs, runs handlers, settles outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, QueueError};
use super::types::{Job, JobState};

/// Outcome reported by a handler for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Transient failure; the job is rescheduled while attempts remain.
    #[error("{0}")]
    Retryable(String),
    /// The job can never succeed; it fails without further attempts.
    #[error("{0}")]
    Permanent(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable(_))
    }
}

/// Handles jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// Queue to consume
    pub queue: String,
    /// Maximum jobs processed at once
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// How long a claimed job stays owned before it counts as stalled
    pub lease: Duration,
    /// Upper bound on a single handler run
    pub handler_timeout: Duration,
    /// How often stalled jobs are swept back to waiting
    pub stalled_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "log-worker".to_string(),
            queue: "logs".to_string(),
            concurrency: 4,
            poll_interval: Duration::from_millis(200),
            lease: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(25),
            stalled_interval: Duration::from_secs(15),
        }
    }
}

impl WorkerConfig {
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the lease; the handler timeout and stalled sweep follow it.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self.handler_timeout = lease.mul_f64(0.8);
        self.stalled_interval = lease / 2;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub stalled_recovered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    Retrying,
    Failed,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop claiming jobs, wait for in-flight jobs to settle, then return.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task ended abnormally");
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Background worker for one queue.
///
/// Handlers are registered per job name; `"*"` matches any name.
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    /// Register a handler for a job name.
    pub fn register_handler(mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn handler_for(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .get(name)
            .or_else(|| self.handlers.get("*"))
            .cloned()
    }

    /// Spawn the worker loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let stats = self.stats.clone();
        let worker = Arc::new(self);

        let join = tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    /// Claim and process a single job inline. Returns `None` when nothing is ready.
    pub async fn process_next(&self) -> Result<Option<AttemptOutcome>, QueueError> {
        match self.queue.claim_next(&self.config.queue, self.config.lease).await? {
            Some(job) => {
                let handler = self.handler_for(&job.name);
                let outcome = execute(
                    self.queue.as_ref(),
                    handler,
                    job,
                    self.config.handler_timeout,
                )
                .await;
                self.record(outcome);
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    async fn run(self: Arc<Self>, shutdown_rx: &mut mpsc::Receiver<()>) {
        let config = &self.config;
        info!(
            worker = %config.name,
            queue = %config.queue,
            concurrency = config.concurrency,
            "queue worker started"
        );

        let started = Instant::now();
        let mut tasks: JoinSet<AttemptOutcome> = JoinSet::new();
        let mut stalled_tick = tokio::time::interval(config.stalled_interval);
        stalled_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            while let Some(done) = tasks.try_join_next() {
                self.finish(done);
            }
            self.update(|s| {
                s.current_running = tasks.len();
                s.uptime_secs = started.elapsed().as_secs();
            });

            if shutdown_rx.try_recv().is_ok() {
                info!(worker = %config.name, "queue worker received shutdown signal");
                break;
            }

            if tasks.len() < config.concurrency {
                match self.queue.claim_next(&config.queue, config.lease).await {
                    Ok(Some(job)) => {
                        debug!(
                            worker = %config.name,
                            job_id = %job.id,
                            attempt = job.attempts,
                            "claimed job"
                        );
                        let queue = self.queue.clone();
                        let handler = self.handler_for(&job.name);
                        let timeout = config.handler_timeout;
                        tasks.spawn(async move { execute(queue.as_ref(), handler, job, timeout).await });
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => error!(worker = %config.name, error = %e, "failed to claim job"),
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker = %config.name, "queue worker received shutdown signal");
                    break;
                }
                _ = stalled_tick.tick() => {
                    match self.queue.recover_stalled(&config.queue).await {
                        Ok(0) => {}
                        Ok(n) => {
                            warn!(worker = %config.name, recovered = n, "re-queued stalled jobs");
                            self.update(|s| s.stalled_recovered += n as u64);
                        }
                        Err(e) => error!(worker = %config.name, error = %e, "stalled job sweep failed"),
                    }
                }
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    self.finish(done);
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(worker = %config.name, in_flight, "draining in-flight jobs");
        }
        while let Some(done) = tasks.join_next().await {
            self.finish(done);
        }

        info!(worker = %config.name, "queue worker stopped");
    }

    fn finish(&self, done: Result<AttemptOutcome, tokio::task::JoinError>) {
        match done {
            Ok(outcome) => self.record(outcome),
            Err(e) => error!(worker = %self.config.name, error = %e, "job task panicked"),
        }
    }

    fn record(&self, outcome: AttemptOutcome) {
        self.update(|s| {
            s.jobs_processed += 1;
            match outcome {
                AttemptOutcome::Completed => s.jobs_succeeded += 1,
                AttemptOutcome::Retrying => s.jobs_retried += 1,
                AttemptOutcome::Failed => s.jobs_failed += 1,
            }
        });
    }

    fn update(&self, f: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }
}

/// Run one attempt of `job` and settle the result with the queue.
async fn execute(
    queue: &dyn JobQueue,
    handler: Option<Arc<dyn JobHandler>>,
    mut job: Job,
    timeout: Duration,
) -> AttemptOutcome {
    let started = Utc::now();

    let result = match handler {
        Some(handler) => match tokio::time::timeout(timeout, handler.handle(&job)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Retryable(format!(
                "handler exceeded timeout of {}ms",
                timeout.as_millis()
            ))),
        },
        None => Err(JobError::Permanent(format!("no handler for job type: {}", job.name))),
    };

    match result {
        Ok(()) => {
            job.mark_completed(started);
            debug!(job_id = %job.id, queue = %job.queue, "job completed");
        }
        Err(e) => {
            job.mark_failed(e.to_string(), started, e.is_retryable());
            if job.state == JobState::Failed {
                error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts(),
                    error = %e,
                    "job failed permanently"
                );
            } else {
                warn!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts(),
                    error = %e,
                    "job attempt failed, will retry"
                );
            }
        }
    }

    if let Err(e) = queue.settle(&job).await {
        // The lease stays in place; the stalled sweep re-delivers the job.
        error!(job_id = %job.id, queue = %job.queue, error = %e, "failed to settle job");
    }

    match job.state {
        JobState::Completed => AttemptOutcome::Completed,
        JobState::Failed => AttemptOutcome::Failed,
        JobState::Waiting | JobState::Active => AttemptOutcome::Retrying,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::jobs::queue::InMemoryJobQueue;
    use crate::jobs::types::JobOptions;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(JobError::Retryable("database unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Rejecting;

    #[async_trait]
    impl JobHandler for Rejecting {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            Err(JobError::Permanent("payload is not a log record".to_string()))
        }
    }

    fn options(attempts: u32) -> JobOptions {
        JobOptions::new(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn successful_job_completes() {
        let queue = InMemoryJobQueue::arc();
        let id = queue.enqueue("logs", "log", json!({}), &options(2)).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::for_queue("logs"))
            .register_handler("log", Flaky::new(0));

        assert_eq!(worker.process_next().await.unwrap(), Some(AttemptOutcome::Completed));

        let job = queue.get("logs", id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn always_failing_job_uses_exactly_max_attempts() {
        let queue = InMemoryJobQueue::arc();
        let id = queue.enqueue("logs", "log", json!({}), &options(2)).await.unwrap();
        let handler = Flaky::new(u32::MAX);
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::for_queue("logs"))
            .register_handler("log", handler.clone());

        assert_eq!(worker.process_next().await.unwrap(), Some(AttemptOutcome::Retrying));
        assert_eq!(worker.process_next().await.unwrap(), Some(AttemptOutcome::Failed));
        assert_eq!(worker.process_next().await.unwrap(), None);

        let job = queue.get("logs", id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fail_then_succeed_completes_on_second_attempt() {
        let queue = InMemoryJobQueue::arc();
        let id = queue.enqueue("logs", "log", json!({}), &options(2)).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::for_queue("logs"))
            .register_handler("log", Flaky::new(1));

        worker.process_next().await.unwrap();
        worker.process_next().await.unwrap();

        let job = queue.get("logs", id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.history.len(), 2);
        assert!(!job.history[0].success);
        assert!(job.history[1].success);
    }

    #[tokio::test]
    async fn permanent_error_fails_immediately() {
        let queue = InMemoryJobQueue::arc();
        let id = queue.enqueue("logs", "log", json!({}), &options(5)).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::for_queue("logs"))
            .register_handler("log", Arc::new(Rejecting));

        assert_eq!(worker.process_next().await.unwrap(), Some(AttemptOutcome::Failed));
        assert_eq!(queue.get("logs", id).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn missing_handler_fails_job() {
        let queue = InMemoryJobQueue::arc();
        queue.enqueue("logs", "mystery", json!({}), &options(2)).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::for_queue("logs"))
            .register_handler("log", Flaky::new(0));

        assert_eq!(worker.process_next().await.unwrap(), Some(AttemptOutcome::Failed));
    }

    #[tokio::test]
    async fn wildcard_handler_matches_any_name() {
        let queue = InMemoryJobQueue::arc();
        queue.enqueue("logs", "anything", json!({}), &options(1)).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::for_queue("logs"))
            .register_handler("*", Flaky::new(0));

        assert_eq!(worker.process_next().await.unwrap(), Some(AttemptOutcome::Completed));
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_shuts_down() {
        let queue = InMemoryJobQueue::arc();
        for n in 0..10 {
            queue.enqueue("logs", "log", json!({ "n": n }), &options(2)).await.unwrap();
        }

        let config = WorkerConfig::for_queue("logs")
            .with_concurrency(3)
            .with_poll_interval(Duration::from_millis(10));
        let handle = QueueWorker::new(queue.clone(), config)
            .register_handler("log", Flaky::new(0))
            .spawn();

        for _ in 0..200 {
            if queue.counts("logs").await.unwrap().completed == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(queue.counts("logs").await.unwrap().completed, 10);
        assert!(stats.jobs_succeeded <= 10);
    }
}
