//! Producer side: hands log records to the queue without blocking callers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::record::NewLogRecord;
use crate::config::LogQueueConfig;
use crate::jobs::{JobId, JobOptions, JobQueue, QueueError};

/// Job type used for log records.
pub const LOG_JOB_NAME: &str = "log";

/// Enqueues log records on the log queue.
#[derive(Clone)]
pub struct LogProducer {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    options: JobOptions,
    enqueue_timeout: Duration,
}

impl std::fmt::Debug for LogProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogProducer")
            .field("queue_name", &self.queue_name)
            .field("options", &self.options)
            .field("enqueue_timeout", &self.enqueue_timeout)
            .finish_non_exhaustive()
    }
}

impl LogProducer {
    pub fn new(queue: Arc<dyn JobQueue>, config: &LogQueueConfig) -> Self {
        Self {
            queue,
            queue_name: config.name.clone(),
            options: JobOptions::new(config.attempts, config.backoff),
            enqueue_timeout: config.enqueue_timeout,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Enqueue one record, bounded by the enqueue timeout.
    pub async fn enqueue(&self, record: &NewLogRecord) -> Result<JobId, QueueError> {
        let payload = serde_json::to_value(record).map_err(|e| QueueError::Serialization(e.to_string()))?;

        tokio::time::timeout(
            self.enqueue_timeout,
            self.queue.enqueue(&self.queue_name, LOG_JOB_NAME, payload, &self.options),
        )
        .await
        .map_err(|_| QueueError::Timeout(self.enqueue_timeout))?
    }

    /// Enqueue on a background task. Failures are logged and dropped.
    pub fn dispatch(&self, record: NewLogRecord) -> JoinHandle<Option<JobId>> {
        let producer = self.clone();
        tokio::spawn(async move {
            match producer.enqueue(&record).await {
                Ok(job_id) => {
                    debug!(job_id = %job_id, action = %record.action, route = %record.route, "log record enqueued");
                    Some(job_id)
                }
                Err(e) => {
                    warn!(
                        queue = %producer.queue_name,
                        action = %record.action,
                        route = %record.route,
                        error = %e,
                        "failed to enqueue log record"
                    );
                    None
                }
            }
        })
    }
}
