//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backends, log pipeline and the operations handlers call
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON response shapes
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, middleware::from_fn_with_state, routing::get};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    // Client routes are audited. Auth is the outer layer so the interceptor
    // sees the caller.
    let audited = routes::clients::router()
        .route_layer(from_fn_with_state(
            services.producer().clone(),
            middleware::audit_middleware,
        ))
        .route_layer(from_fn_with_state(services.clone(), middleware::auth_middleware));

    let protected = Router::new()
        .route("/whoami", get(routes::system::whoami))
        .merge(routes::logs::router())
        .merge(routes::queues::router())
        .route_layer(from_fn_with_state(services.clone(), middleware::auth_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::auth::router())
        .merge(audited)
        .merge(protected)
        .layer(Extension(services))
}
