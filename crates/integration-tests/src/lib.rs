//! Shared fixtures for the Rusty-Chat integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use rc_api::AppState;
use rc_auth_simple::AdminKeyAuth;
use rc_core::{Mediator, ServerEvent, Snapshot, OUTBOUND_CAPACITY};
use secrecy::SecretString;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const ADMIN_KEY: &str = "test-admin-key";

pub fn mediator() -> Arc<Mediator> {
    Arc::new(Mediator::new(Snapshot::default()))
}

/// Full router with `X-Forwarded-For` trusted, so tests pick the caller IP.
pub fn app(mediator: Arc<Mediator>) -> Router {
    rc_api::router(AppState {
        mediator,
        auth: Arc::new(AdminKeyAuth::new(SecretString::from(ADMIN_KEY.to_string()))),
        trust_forwarded_for: true,
    })
}

/// Serves the full router on an ephemeral local port, with peer addresses
/// available to the client IP extractor.
pub async fn spawn_server(mediator: Arc<Mediator>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(mediator);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

pub struct TestRequest {
    method: Method,
    uri: String,
    ip: Option<String>,
    admin_key: Option<String>,
    body: Option<String>,
}

impl TestRequest {
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            ip: None,
            admin_key: None,
            body: None,
        }
    }

    pub fn from_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn admin(self) -> Self {
        self.admin_key(ADMIN_KEY)
    }

    pub fn admin_key(mut self, key: &str) -> Self {
        self.admin_key = Some(key.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn raw(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Runs the request and returns the status with the decoded JSON body
    /// (`Value::Null` when the body is empty).
    pub async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(ip) = self.ip {
            builder = builder.header("x-forwarded-for", ip);
        }
        if let Some(key) = self.admin_key {
            builder = builder.header("x-admin-key", key);
        }
        let body = match self.body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

/// Outbound channel sized the way the WebSocket transport sizes it.
pub fn outbound() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

/// Drains whatever a connection's outbound channel holds right now.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
