use serde::Deserialize;
use serde_json::json;

use clientdesk_clients::Client;
use clientdesk_core::{Page, PageRequest};
use clientdesk_infra::audit::LogRecord;
use clientdesk_infra::jobs::{JobCounts, JobState};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn to_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

/// Default number of jobs returned by the dashboard listing.
pub const DEFAULT_JOBS_LIMIT: usize = 50;

impl JobsQuery {
    /// Failed jobs unless another state is asked for.
    pub fn state(&self) -> Result<JobState, String> {
        match self.state.as_deref() {
            None => Ok(JobState::Failed),
            Some(s) => s.parse(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_JOBS_LIMIT).clamp(1, 500)
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn clients_page_to_json(page: Page<Client>) -> serde_json::Value {
    json!({
        "total": page.total,
        "clients": page.items,
    })
}

pub fn logs_page_to_json(page: Page<LogRecord>) -> serde_json::Value {
    json!({
        "total": page.total,
        "items": page.items,
    })
}

pub fn queue_counts_to_json(queues: Vec<(String, JobCounts)>) -> serde_json::Value {
    let queues = queues
        .into_iter()
        .map(|(name, counts)| json!({ "name": name, "counts": counts }))
        .collect::<Vec<_>>();
    json!({ "queues": queues })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_query_defaults_to_failed() {
        let q = JobsQuery::default();
        assert_eq!(q.state(), Ok(JobState::Failed));
        assert_eq!(q.limit(), DEFAULT_JOBS_LIMIT);
    }

    #[test]
    fn jobs_query_rejects_unknown_state() {
        let q = JobsQuery {
            state: Some("sleeping".to_string()),
            limit: Some(0),
        };
        assert!(q.state().is_err());
        assert_eq!(q.limit(), 1);
    }
}
