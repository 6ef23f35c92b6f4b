//! Postgres-backed log store (`logs` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use clientdesk_core::{JsonMap, LogId, Page, PageRequest, UserId};

use super::record::{LogRecord, NewLogRecord};
use super::store::{LogStore, LogStoreError};
use crate::jobs::JobId;

const LOG_COLUMNS: &str = r#"
    id, action, route, method, params, query, body, user_id,
    status_code, response, "timestamp", duration, job_id
"#;

/// Postgres log store.
///
/// `job_id` carries a unique index, so a redelivered job never produces a
/// second row.
#[derive(Debug, Clone)]
pub struct PostgresLogStore {
    pool: Arc<PgPool>,
}

impl PostgresLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn find_by_job(&self, job_id: JobId) -> Result<Option<LogRecord>, LogStoreError> {
        let row = sqlx::query(&format!("SELECT {LOG_COLUMNS} FROM logs WHERE job_id = $1"))
            .bind(job_id.0)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_job", e))?;

        row.map(|row| LogRow::from_row(&row).map(LogRecord::from))
            .transpose()
            .map_err(|e| LogStoreError::Storage(format!("failed to decode log row: {e}")))
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    #[instrument(
        skip(self, record),
        fields(action = record.action.as_str(), job_id = ?record.job_id),
        err
    )]
    async fn create(&self, record: NewLogRecord) -> Result<LogRecord, LogStoreError> {
        let record = LogRecord::from_new(record);

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO logs ({LOG_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (job_id) DO NOTHING
            "#
        ))
        .bind(record.id.as_uuid())
        .bind(record.action.as_str())
        .bind(&record.route)
        .bind(&record.method)
        .bind(Json(&record.params))
        .bind(Json(&record.query))
        .bind(Json(&record.body))
        .bind(record.user_id.map(|id| *id.as_uuid()))
        .bind(i32::from(record.status_code))
        .bind(Json(&record.response))
        .bind(record.timestamp)
        .bind(i64::try_from(record.duration).unwrap_or(i64::MAX))
        .bind(record.job_id.map(|id| id.0))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_log", e))?;

        if inserted.rows_affected() == 0 {
            if let Some(job_id) = record.job_id {
                if let Some(existing) = self.find_by_job(job_id).await? {
                    return Ok(existing);
                }
            }
        }
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn list(&self, page: PageRequest) -> Result<Page<LogRecord>, LogStoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_logs", e))?;

        let rows = sqlx::query(&format!(
            r#"SELECT {LOG_COLUMNS} FROM logs ORDER BY "timestamp" DESC, id DESC LIMIT $1 OFFSET $2"#
        ))
        .bind(i64::from(page.limit))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_logs", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let row = LogRow::from_row(&row)
                .map_err(|e| LogStoreError::Storage(format!("failed to decode log row: {e}")))?;
            items.push(row.into());
        }

        Ok(Page::new(total.max(0) as u64, items))
    }
}

struct LogRow {
    id: uuid::Uuid,
    action: String,
    route: String,
    method: String,
    params: Json<JsonMap>,
    query: Json<JsonMap>,
    body: Json<serde_json::Value>,
    user_id: Option<uuid::Uuid>,
    status_code: i32,
    response: Json<serde_json::Value>,
    timestamp: DateTime<Utc>,
    duration: i64,
    job_id: Option<uuid::Uuid>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for LogRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(LogRow {
            id: row.try_get("id")?,
            action: row.try_get("action")?,
            route: row.try_get("route")?,
            method: row.try_get("method")?,
            params: row.try_get("params")?,
            query: row.try_get("query")?,
            body: row.try_get("body")?,
            user_id: row.try_get("user_id")?,
            status_code: row.try_get("status_code")?,
            response: row.try_get("response")?,
            timestamp: row.try_get("timestamp")?,
            duration: row.try_get("duration")?,
            job_id: row.try_get("job_id")?,
        })
    }
}

impl From<LogRow> for LogRecord {
    fn from(row: LogRow) -> Self {
        LogRecord {
            id: LogId::from_uuid(row.id),
            action: row.action.parse().unwrap_or(super::record::Action::Unknown),
            route: row.route,
            method: row.method,
            params: row.params.0,
            query: row.query.0,
            body: row.body.0,
            user_id: row.user_id.map(UserId::from_uuid),
            status_code: u16::try_from(row.status_code).unwrap_or_default(),
            response: row.response.0,
            timestamp: row.timestamp,
            duration: row.duration.max(0) as u64,
            job_id: row.job_id.map(JobId::from_uuid),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LogStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            LogStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        other @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)) => {
            LogStoreError::Unavailable(format!("{operation}: {other}"))
        }
        other => LogStoreError::Storage(format!("{operation}: {other}")),
    }
}
