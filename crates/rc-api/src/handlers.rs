//! # rc-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the mediator.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use rc_core::error::AppError;
use rc_core::models::{BanType, Report, SanctionView};
use rc_core::traits::AdminAuth;
use rc_core::Mediator;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::client_ip::ClientIp;
use crate::error::ApiError;

/// State shared across all handlers and socket tasks.
#[derive(Clone)]
pub struct AppState {
    pub mediator: Arc<Mediator>,
    pub auth: Arc<dyn AdminAuth>,
    /// Whether `X-Forwarded-For` is trusted for client IP derivation.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SanctionRequest {
    pub ip: Option<String>,
    #[serde(rename = "type")]
    pub ban_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnbanRequest {
    pub ip: Option<String>,
}

/// `POST /api/report`: stores an abuse report stamped with the caller's IP.
pub async fn submit_report(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let fields: Map<String, Value> = parse_body(&body)?;
    let report = state.mediator.submit_report(&ip, fields);
    Ok(Json(json!({ "ok": true, "id": report.id })))
}

/// `GET /api/admin/reports`
pub async fn list_reports(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "reports": state.mediator.list_reports() }))
}

/// `GET /api/admin/reports/{id}`
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Arc<Report>>, ApiError> {
    Ok(Json(state.mediator.get_report(&id)?))
}

/// `POST /api/admin/sanction`: `{ip, type}` with type in {15m, 3d, forever}.
pub async fn apply_sanction(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: SanctionRequest = parse_body(&body)?;
    let (Some(ip), Some(ban_type)) = (non_empty(request.ip), non_empty(request.ban_type)) else {
        return Err(AppError::ValidationError("ip and type required".into()).into());
    };
    let ban_type: BanType = ban_type.parse()?;

    let sanction = state.mediator.apply_sanction(&ip, ban_type);
    Ok(Json(json!({ "ok": true, "sanction": sanction })))
}

/// `POST /api/admin/unban`: removes the record for `{ip}` entirely.
pub async fn unban(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let request: UnbanRequest = parse_body(&body)?;
    let Some(ip) = non_empty(request.ip) else {
        return Err(AppError::ValidationError("ip required".into()).into());
    };
    state.mediator.clear_sanction(&ip);
    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/admin/banned`: every stored record, expired ones included.
pub async fn list_banned(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "banned": state.mediator.list_sanctions() }))
}

/// `GET /api/sanction/me`: sanction status for the caller's own IP.
pub async fn sanction_me(State(state): State<AppState>, ClientIp(ip): ClientIp) -> Json<SanctionView> {
    Json(state.mediator.sanction_view(&ip))
}

/// Lenient JSON body parsing: an empty body is `T::default()`, anything
/// unparsable is a 400 with a JSON error body.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::ValidationError(format!("invalid JSON body: {e}")).into())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
