use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/log", get(list_logs))
}

/// Persisted audit records, newest first.
pub async fn list_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PageQuery>,
) -> axum::response::Response {
    match services.list_logs(query.to_request()).await {
        Ok(page) => (StatusCode::OK, Json(dto::logs_page_to_json(page))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
