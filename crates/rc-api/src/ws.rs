//! WebSocket transport for chat connections.
//!
//! Each socket gets one writer task draining the connection's outbound
//! channel and one read loop feeding decoded events into the mediator.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rc_core::{ClientEvent, Mediator, ServerEvent, OUTBOUND_CAPACITY};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client_ip::ClientIp;
use crate::handlers::AppState;

/// `GET /ws`
pub async fn chat_socket(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_connection(state.mediator, ip, socket))
}

async fn run_connection(mediator: Arc<Mediator>, ip: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_CAPACITY);

    let id = match mediator.connect(ip, tx) {
        Ok(id) => id,
        Err(_) => {
            // The mediator queued the session-end notice; flush it and close.
            while let Ok(event) = rx.try_recv() {
                if send_event(&mut sink, &event).await.is_err() {
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if send_event(&mut sink, &event).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => mediator.handle(id, event),
                Err(e) => debug!(connection = %id, error = %e, "ignoring malformed event"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %id, error = %e, "socket read failed");
                break;
            }
        }
    }

    // Dropping the registry's sender ends the writer once it has flushed.
    mediator.disconnect(id);
    if let Err(e) = writer.await {
        warn!(connection = %id, error = %e, "socket writer task failed");
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to encode server event");
            Ok(())
        }
    }
}
