//! Consumer side: turns `log` jobs into stored log records.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::record::NewLogRecord;
use super::store::LogStore;
use crate::jobs::{Job, JobError, JobHandler};

/// Persists the log record carried by a job.
///
/// An undecodable payload fails the job permanently; a store failure is
/// retried according to the job's policy.
pub struct LogPersistHandler {
    store: Arc<dyn LogStore>,
}

impl LogPersistHandler {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobHandler for LogPersistHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let mut record: NewLogRecord = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Permanent(format!("invalid log payload: {e}")))?;
        record.job_id = Some(job.id);

        let stored = self
            .store
            .create(record)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;

        debug!(job_id = %job.id, log_id = %stored.id, action = %stored.action, "log record persisted");
        Ok(())
    }
}
