//! Queue abstraction and the in-memory backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::warn;

use super::types::{Job, JobCounts, JobId, JobOptions, JobState};

/// Durable FIFO-with-retry mailbox, addressed by queue name.
///
/// Delivery is at-least-once: a job whose worker disappears is handed out again
/// once its lease lapses and [`JobQueue::recover_stalled`] runs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job to the back of `queue`.
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: JsonValue,
        options: &JobOptions,
    ) -> Result<JobId, QueueError>;

    /// Claim the next ready job, promoting due delayed jobs first.
    ///
    /// The returned job is `Active`, its `attempts` already incremented and its
    /// lease set to `lease` from now.
    async fn claim_next(&self, queue: &str, lease: Duration) -> Result<Option<Job>, QueueError>;

    /// Store the post-attempt state of a job claimed with `claim_next`.
    ///
    /// Fails with [`QueueError::InvalidState`] when the claim is no longer held
    /// (the job was recovered as stalled and re-delivered in the meantime).
    async fn settle(&self, job: &Job) -> Result<(), QueueError>;

    /// Release active jobs whose lease expired. A job that lost its final
    /// attempt is failed; the rest go back to waiting. Returns how many were
    /// released.
    async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError>;

    async fn get(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError>;

    async fn counts(&self, queue: &str) -> Result<JobCounts, QueueError>;

    /// List up to `limit` jobs in `state`. `Waiting` includes delayed jobs.
    async fn list(&self, queue: &str, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Move a failed job back to waiting with a fresh attempt budget.
    async fn retry_failed(&self, queue: &str, id: JobId) -> Result<Job, QueueError>;

    /// Stop accepting work. Later calls fail with [`QueueError::Unavailable`].
    async fn close(&self) -> Result<(), QueueError>;
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("queue operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid job state: {0}")]
    InvalidState(String),
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Waiting job ids in delivery order (delayed ones included).
    wait: VecDeque<JobId>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    closed: bool,
}

/// In-memory queue for tests and single-process development.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    inner: Mutex<Inner>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, QueueError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;
        if inner.closed {
            return Err(QueueError::Unavailable("queue closed".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: JsonValue,
        options: &JobOptions,
    ) -> Result<JobId, QueueError> {
        let job = Job::new(queue, name, payload, options);
        let id = job.id;

        let mut inner = self.lock()?;
        let state = inner.queues.entry(queue.to_string()).or_default();
        state.wait.push_back(id);
        state.jobs.insert(id, job);
        Ok(id)
    }

    async fn claim_next(&self, queue: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
        let mut inner = self.lock()?;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Utc::now();
        let position = state
            .wait
            .iter()
            .position(|id| state.jobs.get(id).is_some_and(|job| job.is_ready_at(now)));

        let Some(position) = position else {
            return Ok(None);
        };
        let Some(id) = state.wait.remove(position) else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.mark_active(lease);
        Ok(Some(job.clone()))
    }

    async fn settle(&self, job: &Job) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let state = inner
            .queues
            .get_mut(&job.queue)
            .ok_or(QueueError::NotFound(job.id))?;
        let stored = state.jobs.get_mut(&job.id).ok_or(QueueError::NotFound(job.id))?;

        if stored.state != JobState::Active || stored.attempts != job.attempts {
            return Err(QueueError::InvalidState(format!(
                "job {} is no longer held by this attempt",
                job.id
            )));
        }

        *stored = job.clone();
        if job.state == JobState::Waiting {
            state.wait.push_back(job.id);
        }
        Ok(())
    }

    async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError> {
        let mut inner = self.lock()?;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut recovered = Vec::new();
        let mut released = 0;
        for job in state.jobs.values_mut() {
            if job.is_stalled_at(now) {
                released += 1;
                if job.mark_stalled() {
                    recovered.push(job.id);
                } else {
                    warn!(job_id = %job.id, queue = %job.queue, attempts = job.attempts, "job stalled on its final attempt");
                }
            }
        }
        // Stalled jobs go to the front of the line.
        for id in recovered.iter().rev() {
            state.wait.push_front(*id);
        }
        Ok(released)
    }

    async fn get(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError> {
        let inner = self.lock()?;
        Ok(inner
            .queues
            .get(queue)
            .and_then(|state| state.jobs.get(&id))
            .cloned())
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts, QueueError> {
        let inner = self.lock()?;
        let mut counts = JobCounts::default();
        let Some(state) = inner.queues.get(queue) else {
            return Ok(counts);
        };

        let now = Utc::now();
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting if job.is_delayed_at(now) => counts.delayed += 1,
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn list(&self, queue: &str, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError> {
        let inner = self.lock()?;
        let Some(queue_state) = inner.queues.get(queue) else {
            return Ok(Vec::new());
        };

        let mut jobs: Vec<Job> = queue_state
            .jobs
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect();
        // Newest first.
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn retry_failed(&self, queue: &str, id: JobId) -> Result<Job, QueueError> {
        let mut inner = self.lock()?;
        let state = inner.queues.get_mut(queue).ok_or(QueueError::NotFound(id))?;
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if job.state != JobState::Failed {
            return Err(QueueError::InvalidState(format!(
                "job {id} is {}, only failed jobs can be retried",
                job.state.as_str()
            )));
        }

        job.reset_for_retry();
        let job = job.clone();
        state.wait.push_back(id);
        Ok(job)
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;
        inner.closed = true;
        Ok(())
    }
}
