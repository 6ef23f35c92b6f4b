use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use clientdesk_auth::TokenError;
use clientdesk_core::DomainError;
use clientdesk_infra::{RepositoryError, audit::LogStoreError, jobs::QueueError};

use crate::app::services::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Token(e) => token_error_to_response(e),
        ServiceError::Repository(RepositoryError::Conflict(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        ServiceError::Repository(RepositoryError::Unavailable(msg)) => {
            tracing::error!(error = %msg, "repository unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg)
        }
        ServiceError::Repository(RepositoryError::Storage(msg)) => {
            tracing::error!(error = %msg, "repository failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
        ServiceError::LogStore(LogStoreError::Unavailable(msg)) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg)
        }
        ServiceError::LogStore(LogStoreError::Storage(msg)) => {
            tracing::error!(error = %msg, "log store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
        ServiceError::Queue(e) => queue_error_to_response(e),
        ServiceError::UnknownQueue(name) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("unknown queue: {name}"))
        }
    }
}

fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = match &err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Unauthorized => StatusCode::UNAUTHORIZED,
    };
    json_error(status, err.code(), err.to_string())
}

fn token_error_to_response(err: TokenError) -> axum::response::Response {
    match err {
        TokenError::Signing(msg) => {
            tracing::error!(error = %msg, "token signing failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", "failed to issue token")
        }
        other => json_error(StatusCode::UNAUTHORIZED, "unauthorized", other.to_string()),
    }
}

fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        QueueError::InvalidState(msg) => json_error(StatusCode::CONFLICT, "invalid_state", msg),
        QueueError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        QueueError::Timeout(after) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            format!("queue timed out after {after:?}"),
        ),
        QueueError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
    }
}

/// Body extraction failures answer with the same error envelope as everything else.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(rejection.status(), "invalid_body", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
