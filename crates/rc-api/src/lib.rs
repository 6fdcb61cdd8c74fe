//! # rc-api
//!
//! The web routing and transport layer for Rusty-Chat.

pub mod client_ip;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ws;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

pub use handlers::AppState;

/// Builds the full application router.
///
/// # Developer Note
/// The admin routes carry the key check as a `route_layer`, so unknown
/// paths under `/api/admin` still answer 404 rather than 401.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/reports", get(handlers::list_reports))
        .route("/reports/{id}", get(handlers::get_report))
        .route("/sanction", post(handlers::apply_sanction))
        .route("/unban", post(handlers::unban))
        .route("/banned", get(handlers::list_banned))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin));

    Router::new()
        // Chat connections
        .route("/ws", get(ws::chat_socket))
        // Public report and self-status endpoints
        .route("/api/report", post(handlers::submit_report))
        .route("/api/sanction/me", get(handlers::sanction_me))
        // Moderation
        .nest("/api/admin", admin)
        .layer(middleware::cors_policy())
        .layer(middleware::standard_middleware())
        .with_state(state)
}
