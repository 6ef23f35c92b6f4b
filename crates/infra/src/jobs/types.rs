//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Job lifecycle state.
///
/// A `Waiting` job whose `scheduled_at` lies in the future is "delayed": it is
/// waiting out a retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, waiting to be picked up
    Waiting,
    /// Claimed by a worker, attempt in progress
    Active,
    /// Completed successfully
    Completed,
    /// Exhausted its attempts (or failed permanently); not retried automatically
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// `last_error` of a job whose final attempt lost its lease.
pub const STALLED_ON_FINAL_ATTEMPT: &str = "stalled on final attempt";

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay`
    Exponential,
    /// Delay grows by `base_delay` per attempt, capped at `max_delay`
    Linear,
}

/// Attempt budget and backoff of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first one (minimum 1)
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// Two attempts, five seconds apart.
    fn default() -> Self {
        Self::fixed(2, Duration::from_millis(5_000))
    }
}

impl RetryPolicy {
    /// Single attempt; a failure parks the job immediately.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            ..Self::exponential(max_attempts, base_delay, max_delay)
        }
    }

    /// Delay before the attempt that follows attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match (self.strategy, attempt) {
            (_, 0) => Duration::ZERO,
            (BackoffStrategy::Fixed, _) => self.base_delay,
            (BackoffStrategy::Exponential, n) => {
                let factor = 1u32 << (n - 1).min(20);
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            }
            (BackoffStrategy::Linear, n) => self.base_delay.saturating_mul(n).min(self.max_delay),
        }
    }

    /// Whether a job that has used `attempts` attempts may run again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Per-job enqueue options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts (including the first)
    pub attempts: u32,
    /// Delay between attempts
    #[serde(with = "duration_ms")]
    pub backoff: Duration,
    /// Backoff strategy applied to `backoff`
    pub strategy: BackoffStrategy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(5_000),
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl JobOptions {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts,
            backoff,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.strategy {
            BackoffStrategy::Fixed => RetryPolicy::fixed(self.attempts, self.backoff),
            BackoffStrategy::Exponential => {
                RetryPolicy::exponential(self.attempts, self.backoff, self.backoff.saturating_mul(16))
            }
            BackoffStrategy::Linear => {
                RetryPolicy::linear(self.attempts, self.backoff, self.backoff.saturating_mul(self.attempts.max(1)))
            }
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Queue this job belongs to
    pub queue: String,
    /// Job type, used for handler routing and display
    pub name: String,
    /// JSON payload
    pub payload: serde_json::Value,
    /// Current state
    pub state: JobState,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Attempts made so far (starts at 0, incremented on claim)
    pub attempts: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be delivered (retry backoff)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// While active: when the claim lapses and the job counts as stalled
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message from the most recent failed attempt
    pub last_error: Option<String>,
    /// Execution history (one record per finished attempt)
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    /// Create a new waiting job.
    pub fn new(
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: &JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            name: name.into(),
            payload,
            state: JobState::Waiting,
            retry_policy: options.retry_policy(),
            attempts: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            lease_expires_at: None,
            finished_at: None,
            last_error: None,
            history: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_policy.max_attempts
    }

    /// Check if a waiting job is ready to be delivered at `now`.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.scheduled_at.is_none_or(|at| now >= at)
    }

    /// Check if a waiting job is held back by a retry backoff at `now`.
    pub fn is_delayed_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.scheduled_at.is_some_and(|at| now < at)
    }

    /// Check if an active job's lease has lapsed at `now`.
    pub fn is_stalled_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lease_expires_at.is_some_and(|at| now >= at)
    }

    /// Mark the job as claimed by a worker for `lease`.
    pub fn mark_active(&mut self, lease: Duration) {
        let now = Utc::now();
        self.state = JobState::Active;
        self.attempts += 1;
        self.scheduled_at = None;
        self.lease_expires_at = Some(now + to_chrono(lease));
        self.updated_at = now;
    }

    /// Mark the job as completed.
    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.state = JobState::Completed;
        self.lease_expires_at = None;
        self.finished_at = Some(now);
        self.updated_at = now;
        self.push_history(started_at, now, None);
    }

    /// Record a failed attempt.
    ///
    /// Reschedules after the policy's backoff when attempts remain and the
    /// failure is retryable; otherwise the job becomes `Failed`.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>, retryable: bool) {
        let now = Utc::now();
        self.updated_at = now;
        self.lease_expires_at = None;
        self.push_history(started_at, now, Some(error.clone()));
        self.last_error = Some(error);

        if retryable && self.retry_policy.should_retry(self.attempts) {
            let delay = self.retry_policy.delay_for_attempt(self.attempts);
            self.scheduled_at = Some(now + to_chrono(delay));
            self.state = JobState::Waiting;
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
        }
    }

    /// Release a job whose lease lapsed.
    ///
    /// The lost attempt counts. When it was the last one the job becomes
    /// `Failed` and this returns `false`; otherwise it is `Waiting` again, with
    /// no backoff, and this returns `true`.
    pub fn mark_stalled(&mut self) -> bool {
        let now = Utc::now();
        self.lease_expires_at = None;
        self.scheduled_at = None;
        self.updated_at = now;

        if self.attempts >= self.max_attempts() {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            self.last_error = Some(STALLED_ON_FINAL_ATTEMPT.to_string());
            false
        } else {
            self.state = JobState::Waiting;
            true
        }
    }

    /// Reset a failed job so an operator-requested retry starts from scratch.
    pub fn reset_for_retry(&mut self) {
        self.state = JobState::Waiting;
        self.attempts = 0;
        self.scheduled_at = None;
        self.lease_expires_at = None;
        self.finished_at = None;
        self.updated_at = Utc::now();
    }

    fn push_history(&mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>, error: Option<String>) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempts,
            started_at,
            finished_at,
            success: error.is_none(),
            error,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// Per-state job counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
