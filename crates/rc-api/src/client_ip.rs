//! Client IP derivation shared by HTTP handlers and the WebSocket upgrade.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::handlers::AppState;

pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// The caller's IP as the mediator keys sanctions on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(derive_ip(&parts.headers, peer, state.trust_forwarded_for)))
    }
}

/// First `X-Forwarded-For` entry if trusted and present, else the socket
/// address. IPv4-mapped IPv6 addresses are reduced to plain IPv4.
pub fn derive_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| first_forwarded(headers))
        .flatten();

    match forwarded {
        Some(ip) => strip_v4_mapped(ip).to_string(),
        None => peer
            .map(|addr| addr.ip().to_canonical().to_string())
            .unwrap_or_default(),
    }
}

fn first_forwarded(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

fn strip_v4_mapped(ip: &str) -> &str {
    ip.strip_prefix("::ffff:").unwrap_or(ip)
}
