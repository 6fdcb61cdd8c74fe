//! # Relay
//!
//! Forwards a payload from a connection to its current partner. Every drop
//! is silent towards the sender: a muted or banned client is never told its
//! messages go nowhere.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::ConnectionId;
use crate::protocol::ServerEvent;
use crate::registry::Registry;
use crate::sanctions::SanctionStore;

/// What happened to a relayed payload. Only used for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered(ConnectionId),
    /// Sender unknown or not paired.
    NoPartner,
    /// Sender's IP holds an active mute or ban.
    Suppressed,
    /// Partner's outbound channel is already closed.
    PartnerGone,
    /// Partner is too far behind; its queue is full.
    Dropped,
}

pub fn relay_message(
    registry: &Registry,
    sanctions: &SanctionStore,
    sender: ConnectionId,
    payload: Value,
    now: DateTime<Utc>,
) -> RelayOutcome {
    let Some(connection) = registry.get(sender) else {
        return RelayOutcome::NoPartner;
    };
    let Some(partner) = connection.partner else {
        return RelayOutcome::NoPartner;
    };
    if !sanctions.can_send(&connection.ip, now) {
        return RelayOutcome::Suppressed;
    }
    if registry.notify(partner, ServerEvent::Message(payload)) {
        RelayOutcome::Delivered(partner)
    } else if registry.is_live(partner) {
        RelayOutcome::Dropped
    } else {
        RelayOutcome::PartnerGone
    }
}
