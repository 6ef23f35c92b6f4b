//! HTTP API: server, routing, audit interceptor and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
