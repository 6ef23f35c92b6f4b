//! Read-mostly job queue dashboard.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use clientdesk_infra::jobs::JobId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/admin/queues", get(queue_counts))
        .route("/admin/queues/:queue/jobs", get(list_jobs))
        .route("/admin/queues/:queue/jobs/:id", get(get_job))
        .route("/admin/queues/:queue/jobs/:id/retry", post(retry_job))
}

pub async fn queue_counts(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.queue_counts().await {
        Ok(counts) => (StatusCode::OK, Json(dto::queue_counts_to_json(counts))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Path(queue): Path<String>,
    Query(query): Query<dto::JobsQuery>,
) -> axum::response::Response {
    let state = match query.state() {
        Ok(state) => state,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_state", msg),
    };

    match services.queue_jobs(&queue, state, query.limit()).await {
        Ok(jobs) => (
            StatusCode::OK,
            Json(serde_json::json!({ "state": state, "jobs": jobs })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path((queue, id)): Path<(String, String)>,
) -> axum::response::Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue_job(&queue, id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Put a failed job back on the wait list with a fresh attempt budget.
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path((queue, id)): Path<(String, String)>,
) -> axum::response::Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.retry_job(&queue, id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("JobId: {e}"))
    })
}
