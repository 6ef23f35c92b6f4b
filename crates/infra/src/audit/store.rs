//! Log record storage.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use clientdesk_core::{Page, PageRequest};

use super::record::{LogRecord, NewLogRecord};

/// Durable table of log records.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist a record.
    ///
    /// Idempotent on `job_id`: when a record carried by the same job already
    /// exists, that record is returned and nothing is written.
    async fn create(&self, record: NewLogRecord) -> Result<LogRecord, LogStoreError>;

    /// Newest first (timestamp, then id, descending).
    async fn list(&self, page: PageRequest) -> Result<Page<LogRecord>, LogStoreError>;
}

/// Log store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogStoreError {
    #[error("log store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory log store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    records: RwLock<Vec<LogRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn create(&self, record: NewLogRecord) -> Result<LogRecord, LogStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| LogStoreError::Storage("log store lock poisoned".to_string()))?;

        if let Some(job_id) = record.job_id {
            if let Some(existing) = records.iter().find(|r| r.job_id == Some(job_id)) {
                return Ok(existing.clone());
            }
        }

        let stored = LogRecord::from_new(record);
        records.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, page: PageRequest) -> Result<Page<LogRecord>, LogStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| LogStoreError::Storage("log store lock poisoned".to_string()))?;

        let mut ordered: Vec<&LogRecord> = records.iter().collect();
        ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let items = page.slice(&ordered).iter().map(|r| (*r).clone()).collect();
        Ok(Page::new(ordered.len() as u64, items))
    }
}
