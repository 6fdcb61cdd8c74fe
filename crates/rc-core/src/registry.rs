//! # Connection Registry
//!
//! Owns every live connection and its partner link. Partner pointers are
//! only ever set or cleared in pairs, so if A points at B then B points
//! at A.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, trace};

use crate::models::ConnectionId;
use crate::protocol::ServerEvent;

/// Events a connection may have queued before further ones are dropped.
/// Delivery is best-effort, so a reader that falls this far behind loses
/// messages instead of growing the queue.
pub const OUTBOUND_CAPACITY: usize = 64;

/// One live client link.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Originating IP. Used for sanctions only, never sent to a peer.
    pub ip: String,
    pub partner: Option<ConnectionId>,
    /// Last preferences supplied with `find_partner`.
    pub preferences: Option<Value>,
    outbound: Sender<ServerEvent>,
}

impl Connection {
    pub fn new(id: ConnectionId, ip: impl Into<String>, outbound: Sender<ServerEvent>) -> Self {
        Self {
            id,
            ip: ip.into(),
            partner: None,
            preferences: None,
            outbound,
        }
    }

    /// False once the transport side has dropped its receiver.
    pub fn is_live(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Best-effort delivery. Never blocks: a closed or full channel drops
    /// the event.
    pub fn notify(&self, event: ServerEvent) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(connection = %self.id, "outbound queue full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    /// Removes `id` without touching its partner; callers unlink first.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(Connection::is_live)
    }

    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.connections.get(&id).and_then(|c| c.partner)
    }

    pub fn notify(&self, id: ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(&id) {
            Some(connection) => connection.notify(event),
            None => false,
        }
    }

    /// Links `a` and `b` symmetrically. Any previous partner of either side
    /// is unlinked first so no third connection is left pointing at them.
    pub fn link(&mut self, a: ConnectionId, b: ConnectionId) -> bool {
        if a == b || !self.contains(a) || !self.contains(b) {
            return false;
        }
        self.unlink(a);
        self.unlink(b);
        if let Some(conn) = self.connections.get_mut(&a) {
            conn.partner = Some(b);
        }
        if let Some(conn) = self.connections.get_mut(&b) {
            conn.partner = Some(a);
        }
        trace!(%a, %b, "linked");
        true
    }

    /// Clears the link on both sides and returns the former partner.
    pub fn unlink(&mut self, id: ConnectionId) -> Option<ConnectionId> {
        let partner = self.connections.get_mut(&id)?.partner.take()?;
        if let Some(other) = self.connections.get_mut(&partner) {
            if other.partner == Some(id) {
                other.partner = None;
            }
        }
        Some(partner)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn register(registry: &mut Registry) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = ConnectionId::new();
        registry.insert(Connection::new(id, "127.0.0.1", tx));
        (id, rx)
    }

    #[test]
    fn link_is_symmetric_and_exclusive() {
        let mut registry = Registry::new();
        let (a, _ra) = register(&mut registry);
        let (b, _rb) = register(&mut registry);
        let (c, _rc) = register(&mut registry);

        assert!(registry.link(a, b));
        assert_eq!(registry.partner_of(a), Some(b));
        assert_eq!(registry.partner_of(b), Some(a));

        assert!(registry.link(a, c));
        assert_eq!(registry.partner_of(a), Some(c));
        assert_eq!(registry.partner_of(c), Some(a));
        assert_eq!(registry.partner_of(b), None);
    }

    #[test]
    fn link_rejects_self_and_unknown() {
        let mut registry = Registry::new();
        let (a, _ra) = register(&mut registry);

        assert!(!registry.link(a, a));
        assert!(!registry.link(a, ConnectionId::new()));
        assert_eq!(registry.partner_of(a), None);
    }

    #[test]
    fn unlink_clears_both_sides() {
        let mut registry = Registry::new();
        let (a, _ra) = register(&mut registry);
        let (b, _rb) = register(&mut registry);

        registry.link(a, b);
        assert_eq!(registry.unlink(b), Some(a));
        assert_eq!(registry.partner_of(a), None);
        assert_eq!(registry.unlink(a), None);
    }

    #[test]
    fn dropped_receiver_means_not_live() {
        let mut registry = Registry::new();
        let (a, rx) = register(&mut registry);

        assert!(registry.is_live(a));
        drop(rx);
        assert!(!registry.is_live(a));
        assert!(!registry.notify(a, ServerEvent::End));
    }

    #[test]
    fn slow_reader_queue_is_capped() {
        let mut registry = Registry::new();
        let (a, mut rx) = register(&mut registry);

        let delivered = (0..OUTBOUND_CAPACITY * 4)
            .filter(|_| registry.notify(a, ServerEvent::Message(Value::from("x".repeat(1024)))))
            .count();

        assert_eq!(delivered, OUTBOUND_CAPACITY);
        assert_eq!(rx.len(), OUTBOUND_CAPACITY);
        // Still live: dropping on overflow does not disconnect the reader.
        assert!(registry.is_live(a));

        rx.try_recv().unwrap();
        assert!(registry.notify(a, ServerEvent::End));
    }
}
