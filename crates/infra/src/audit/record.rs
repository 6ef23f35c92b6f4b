//! Audit log records and request classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use clientdesk_core::{JsonMap, LogId, UserId};

use crate::jobs::JobId;

/// What kind of operation an audited request performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Create,
    GetById,
    GetAll,
    Update,
    Delete,
    Unknown,
}

impl Action {
    /// Classify a request by HTTP method and route template.
    ///
    /// A route is id-shaped when any segment is a path parameter
    /// (`:id` or `{id}`).
    pub fn classify(method: &str, route: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Action::Create,
            "GET" if is_id_route(route) => Action::GetById,
            "GET" => Action::GetAll,
            "PATCH" => Action::Update,
            "DELETE" => Action::Delete,
            _ => Action::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::GetById => "getById",
            Action::GetAll => "getAll",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "getById" => Ok(Action::GetById),
            "getAll" => Ok(Action::GetAll),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "unknown" => Ok(Action::Unknown),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

fn is_id_route(route: &str) -> bool {
    let path = route.split('?').next().unwrap_or_default();
    path.split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('{'))
}

/// A log record as produced by the request interceptor; the queue payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLogRecord {
    pub action: Action,
    /// Concrete request path and query, as received.
    pub route: String,
    pub method: String,
    #[serde(default)]
    pub params: JsonMap,
    #[serde(default)]
    pub query: JsonMap,
    #[serde(default)]
    pub body: JsonValue,
    pub user_id: Option<UserId>,
    pub status_code: u16,
    #[serde(default)]
    pub response: JsonValue,
    /// When the request was observed.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds from request start to response completion.
    pub duration: u64,
    /// Job that carried this record; set by the consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// A persisted log record. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: LogId,
    pub action: Action,
    pub route: String,
    pub method: String,
    pub params: JsonMap,
    pub query: JsonMap,
    pub body: JsonValue,
    pub user_id: Option<UserId>,
    pub status_code: u16,
    pub response: JsonValue,
    pub timestamp: DateTime<Utc>,
    pub duration: u64,
    pub job_id: Option<JobId>,
}

impl LogRecord {
    /// Assign a fresh id to a new record.
    pub fn from_new(record: NewLogRecord) -> Self {
        Self {
            id: LogId::new(),
            action: record.action,
            route: record.route,
            method: record.method,
            params: record.params,
            query: record.query,
            body: record.body,
            user_id: record.user_id,
            status_code: record.status_code,
            response: record.response,
            timestamp: record.timestamp,
            duration: record.duration,
            job_id: record.job_id,
        }
    }
}
