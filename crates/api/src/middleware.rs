use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequestParts, MatchedPath, Query, RawPathParams, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value as JsonValue;

use clientdesk_core::{JsonMap, payload::string_map};
use clientdesk_infra::audit::{Action, LogProducer, NewLogRecord};

use crate::app::errors::{self, json_error};
use crate::app::services::AppServices;
use crate::context::UserContext;

/// Largest request body the audit interceptor buffers.
const MAX_AUDITED_BODY: usize = 2 * 1024 * 1024;

/// Bearer-token guard: validates the JWT and that its user still exists.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(token) => token,
        Err(msg) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
    };

    let user = match services.authenticate(token).await {
        Ok(user) => user,
        Err(e) => return errors::service_error_to_response(e),
    };

    req.extensions_mut().insert(UserContext::new(user.id));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, &'static str> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or("authorization header missing")?;

    let header = header.to_str().map_err(|_| "invalid authorization format")?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or("invalid authorization format")?;

    let token = header.trim();
    if token.is_empty() {
        return Err("invalid authorization format");
    }

    Ok(token)
}

/// Audit interceptor.
///
/// Captures request metadata before the handler runs and, when the handler
/// answers with a non-error status, hands a log record to the producer on a
/// background task. The response is returned unchanged whatever happens to the
/// enqueue. A response body that fails mid-stream becomes a 502 and is not
/// audited.
pub async fn audit_middleware(
    State(producer): State<LogProducer>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let timestamp = Utc::now();
    let clock = Instant::now();

    let (mut parts, body) = req.into_parts();

    let method = parts.method.to_string();
    let route = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let template = parts
        .extensions
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let user_id = parts.extensions.get::<UserContext>().map(|u| u.user_id());
    let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => string_map(params.iter()),
        Err(_) => JsonMap::new(),
    };
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| string_map(q))
        .unwrap_or_default();

    let body = match axum::body::to_bytes(body, MAX_AUDITED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "request body too large",
            );
        }
    };
    let request_body = json_or_null(&body);

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(route = %route, status = status.as_u16(), error = %e, "response body failed while buffering");
            return json_error(
                StatusCode::BAD_GATEWAY,
                "response_body_error",
                "response body could not be produced",
            );
        }
    };

    producer.dispatch(NewLogRecord {
        action: Action::classify(&method, &template),
        route,
        method,
        params,
        query,
        body: request_body,
        user_id,
        status_code: status.as_u16(),
        response: json_or_null(&body),
        timestamp,
        duration: clock.elapsed().as_millis() as u64,
        job_id: None,
    });

    Response::from_parts(parts, Body::from(body))
}

/// Parse a body as JSON; non-JSON bodies are kept as text.
fn json_or_null(bytes: &Bytes) -> JsonValue {
    if bytes.is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers), Ok("abc.def"));
    }

    #[test]
    fn malformed_authorization_is_rejected() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer(&headers).is_err());
    }

    #[test]
    fn bodies_fall_back_to_text() {
        assert_eq!(json_or_null(&Bytes::new()), JsonValue::Null);
        assert_eq!(json_or_null(&Bytes::from_static(b"{\"a\":1}"))["a"], 1);
        assert_eq!(json_or_null(&Bytes::from_static(b"plain")), JsonValue::from("plain"));
    }

    use axum::{
        Json, Router,
        middleware::from_fn_with_state,
        routing::{get, post},
    };
    use clientdesk_infra::config::LogQueueConfig;
    use clientdesk_infra::jobs::{InMemoryJobQueue, Job, JobQueue, JobState};
    use tower::ServiceExt;

    fn audited_router(queue: Arc<InMemoryJobQueue>) -> Router {
        let producer = LogProducer::new(queue, &LogQueueConfig::default());
        Router::new()
            .route(
                "/client",
                post(|Json(body): Json<JsonValue>| async move { (StatusCode::CREATED, Json(body)) }),
            )
            .route("/client/:id", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/client/:id/export",
                get(|| async {
                    let chunks = vec![
                        Ok(Bytes::from_static(b"{\"partial\":")),
                        Err(std::io::Error::other("connection reset")),
                    ];
                    Body::from_stream(tokio_stream::iter(chunks))
                }),
            )
            .route_layer(from_fn_with_state(producer, audit_middleware))
    }

    async fn waiting_jobs(queue: &InMemoryJobQueue) -> Vec<Job> {
        for _ in 0..100 {
            let jobs = queue.list("logs", JobState::Waiting, 10).await.unwrap();
            if !jobs.is_empty() {
                return jobs;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn successful_request_enqueues_one_record() {
        let queue = InMemoryJobQueue::arc();
        let app = audited_router(queue.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/client?source=test")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"Acme","salary":10}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(json_or_null(&body)["name"], "Acme");

        let jobs = waiting_jobs(&queue).await;
        assert_eq!(jobs.len(), 1);
        let payload = &jobs[0].payload;
        assert_eq!(payload["action"], "create");
        assert_eq!(payload["route"], "/client?source=test");
        assert_eq!(payload["method"], "POST");
        assert_eq!(payload["query"]["source"], "test");
        assert_eq!(payload["body"]["salary"], 10);
        assert_eq!(payload["statusCode"], 201);
        assert_eq!(payload["response"]["name"], "Acme");
        assert!(payload["userId"].is_null());
    }

    #[tokio::test]
    async fn error_responses_are_not_audited() {
        let queue = InMemoryJobQueue::arc();
        let app = audited_router(queue.clone());

        let req = Request::builder()
            .uri("/client/0190a8f2-0000-7000-8000-000000000000")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(queue.counts("logs").await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn broken_response_body_is_reported_not_truncated() {
        let queue = InMemoryJobQueue::arc();
        let app = audited_router(queue.clone());

        let req = Request::builder()
            .uri("/client/0190a8f2-0000-7000-8000-000000000000/export")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(json_or_null(&body)["error"], "response_body_error");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(queue.counts("logs").await.unwrap().waiting, 0);
    }
}
