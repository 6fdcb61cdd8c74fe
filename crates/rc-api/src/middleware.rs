//! rusty-chat/crates/rc-api/src/middleware.rs Middleware
//!
//! Admin gate, request tracing and CORS for the Rusty-Chat API.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderName, Method};
use axum::middleware::Next;
use axum::response::Response;
use rc_core::error::AppError;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::client_ip::derive_ip;
use crate::error::ApiError;
use crate::handlers::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Rejects requests whose `x-admin-key` is missing or wrong with 401.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.auth.verify_admin_key(presented) {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = derive_ip(request.headers(), peer, state.trust_forwarded_for);
        warn!(path = %request.uri().path(), %ip, "admin request rejected");
        return Err(AppError::Unauthorized("admin key mismatch".into()).into());
    }
    Ok(next.run(request).await)
}

// Per-request spans: method, path, status and latency.
pub fn standard_middleware() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

// The admin page and the chat UI may be served from another origin.
pub fn cors_policy() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(ADMIN_KEY_HEADER)])
        .max_age(Duration::from_secs(3600))
}
