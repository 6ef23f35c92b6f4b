//! Background job queue with retry, backoff and stalled-job recovery.
//!
//! ## Components
//!
//! - `Job`: a queued payload with its retry policy and attempt history
//! - `JobQueue`: the queue contract (in-memory or Redis)
//! - `QueueWorker`: claims jobs, runs the registered `JobHandler`, settles the outcome
//!
//! Delivery is at-least-once. A failed attempt is rescheduled after the
//! policy's backoff until `max_attempts` is reached; the job is then parked as
//! failed and only an operator retry brings it back.

pub mod queue;
#[cfg(feature = "redis")]
pub mod redis;
pub mod types;
pub mod worker;

pub use queue::{InMemoryJobQueue, JobQueue, QueueError};
#[cfg(feature = "redis")]
pub use redis::RedisJobQueue;
pub use types::{
    BackoffStrategy, Job, JobAttemptRecord, JobCounts, JobId, JobOptions, JobState, RetryPolicy,
    STALLED_ON_FINAL_ATTEMPT,
};
pub use worker::{AttemptOutcome, JobError, JobHandler, QueueWorker, WorkerConfig, WorkerHandle, WorkerStats};
