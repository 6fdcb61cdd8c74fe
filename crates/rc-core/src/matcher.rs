//! # Matcher
//!
//! Single-slot, first-come-first-served pairing. Preferences are stored with
//! the waiting connection but never used to filter or score partners.

use serde_json::Value;

use crate::models::ConnectionId;

/// The one connection currently looking for a partner.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingSlot {
    pub connection: ConnectionId,
    pub preferences: Option<Value>,
}

/// Result of a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    /// The slot was consumed; pair the requester with this connection.
    Matched(ConnectionId),
    /// The requester now occupies the slot.
    Waiting,
}

/// Holds at most one waiting connection.
#[derive(Debug, Default)]
pub struct Matcher {
    waiting: Option<WaitingSlot>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the slot if it holds another live connection, otherwise
    /// parks the requester in it.
    ///
    /// A requester that already owns the slot just refreshes its entry, and
    /// a slot owner that `is_live` rejects is silently replaced.
    pub fn request(
        &mut self,
        connection: ConnectionId,
        preferences: Option<Value>,
        is_live: impl Fn(ConnectionId) -> bool,
    ) -> Pairing {
        match self.waiting.take() {
            Some(slot) if slot.connection != connection && is_live(slot.connection) => {
                Pairing::Matched(slot.connection)
            }
            _ => {
                self.waiting = Some(WaitingSlot {
                    connection,
                    preferences,
                });
                Pairing::Waiting
            }
        }
    }

    /// Clears the slot only if `connection` owns it.
    pub fn cancel(&mut self, connection: ConnectionId) -> bool {
        if self.is_waiting(connection) {
            self.waiting = None;
            true
        } else {
            false
        }
    }

    pub fn is_waiting(&self, connection: ConnectionId) -> bool {
        self.waiting
            .as_ref()
            .is_some_and(|slot| slot.connection == connection)
    }

    pub fn waiting(&self) -> Option<&WaitingSlot> {
        self.waiting.as_ref()
    }
}
