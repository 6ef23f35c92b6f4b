use std::sync::Arc;

use axum::{
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/auth/login", post(login))
}

/// Exchange a user name for an access token; unknown names are registered.
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.login(&body.name).await {
        Ok(token) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "access_token": token })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
