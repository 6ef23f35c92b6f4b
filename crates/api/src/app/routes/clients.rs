use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use clientdesk_clients::{ClientPatch, NewClient};
use clientdesk_core::ClientId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/client", get(list_clients).post(create_client))
        .route(
            "/client/:id",
            get(get_client).patch(update_client).delete(delete_client),
        )
}

pub async fn create_client(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<NewClient>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.create_client(body, user.user_id()).await {
        Ok(client) => (StatusCode::CREATED, Json(client)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_clients(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PageQuery>,
) -> axum::response::Response {
    match services.list_clients(query.to_request()).await {
        Ok(page) => (StatusCode::OK, Json(dto::clients_page_to_json(page))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_client(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.get_client(id).await {
        Ok(client) => (StatusCode::OK, Json(client)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_client(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<ClientPatch>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(patch) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.update_client(id, patch).await {
        Ok(client) => (StatusCode::OK, Json(client)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Soft delete. Answers 200 with an empty body.
pub async fn delete_client(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_client_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.delete_client(id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

fn parse_client_id(raw: &str) -> Result<ClientId, axum::response::Response> {
    raw.parse::<ClientId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
