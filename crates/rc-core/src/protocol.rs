//! # Wire Protocol
//!
//! Events exchanged over a client connection, encoded as JSON objects
//! tagged by `type` with an optional `payload`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request pairing. Preferences are opaque and may be omitted.
    FindPartner(Option<Value>),
    /// Send to the current partner.
    Message(Value),
    /// End the current pairing and re-queue self.
    Next,
    /// End the current pairing without re-queueing.
    End,
    /// Give up waiting for a partner.
    Cancel,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Matched,
    Message(Value),
    End,
}
