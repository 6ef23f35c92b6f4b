//! Asynchronous audit logging.
//!
//! The request path builds a [`NewLogRecord`] and hands it to the
//! [`LogProducer`], which enqueues it on a background task. A queue worker
//! running the [`LogPersistHandler`] writes it to a [`LogStore`]. The two sides
//! share nothing but the queue.

pub mod postgres;
pub mod processor;
pub mod producer;
pub mod record;
pub mod store;

pub use postgres::PostgresLogStore;
pub use processor::LogPersistHandler;
pub use producer::{LOG_JOB_NAME, LogProducer};
pub use record::{Action, LogRecord, NewLogRecord};
pub use store::{InMemoryLogStore, LogStore, LogStoreError};
