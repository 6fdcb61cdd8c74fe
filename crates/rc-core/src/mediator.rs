//! # Mediator
//!
//! Single owned state object for pairing, relay and moderation. Matcher,
//! Registry, Sanction Store and Report Store sit behind one mutex so every
//! operation is atomic with respect to every other: at most one connection
//! waits, and partner links stay symmetric.
//!
//! No lock is held across an `.await`; all methods are synchronous.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::matcher::{Matcher, Pairing};
use crate::models::{
    BanType, ConnectionId, ConnectionState, Report, Sanction, SanctionView, Snapshot,
};
use crate::persistence::SnapshotWriter;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{Connection, Registry};
use crate::relay::{relay_message, RelayOutcome};
use crate::reports::ReportStore;
use crate::sanctions::SanctionStore;

/// Wall clock at the millisecond precision the snapshot file stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Default)]
struct MediatorState {
    registry: Registry,
    matcher: Matcher,
    sanctions: SanctionStore,
    reports: ReportStore,
}

impl MediatorState {
    /// Pointer copies only; cheap enough to take under the lock on every
    /// mutation.
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            reports: self.reports.list().to_vec(),
            sanctions: self.sanctions.list(),
        }
    }

    fn request_pairing(&mut self, id: ConnectionId, preferences: Option<Value>) {
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        if connection.partner.is_some() {
            debug!(connection = %id, "find_partner ignored while paired");
            return;
        }
        connection.preferences = preferences.clone();

        let registry = &self.registry;
        let pairing = self
            .matcher
            .request(id, preferences, |other| registry.is_live(other));
        match pairing {
            Pairing::Matched(other) => {
                self.registry.link(id, other);
                self.registry.notify(id, ServerEvent::Matched);
                self.registry.notify(other, ServerEvent::Matched);
                debug!(connection = %id, partner = %other, "matched");
            }
            Pairing::Waiting => debug!(connection = %id, "waiting for partner"),
        }
    }

    /// Unlinks `id` from its partner and tells the partner the chat ended.
    fn end_pairing(&mut self, id: ConnectionId) -> Option<ConnectionId> {
        let partner = self.registry.unlink(id)?;
        self.registry.notify(partner, ServerEvent::End);
        Some(partner)
    }

    fn next(&mut self, id: ConnectionId) {
        if !self.registry.contains(id) {
            return;
        }
        self.end_pairing(id);
        let preferences = self.registry.get(id).and_then(|c| c.preferences.clone());
        self.request_pairing(id, preferences);
        // Still unmatched: tell the client it is back in the queue.
        if self.registry.partner_of(id).is_none() {
            self.registry.notify(id, ServerEvent::Matched);
        }
    }

    fn end(&mut self, id: ConnectionId) {
        self.matcher.cancel(id);
        self.end_pairing(id);
    }

    fn disconnect(&mut self, id: ConnectionId) {
        self.matcher.cancel(id);
        self.end_pairing(id);
        self.registry.remove(id);
    }

    fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        let connection = self.registry.get(id)?;
        Some(if connection.partner.is_some() {
            ConnectionState::Paired
        } else if self.matcher.is_waiting(id) {
            ConnectionState::Waiting
        } else {
            ConnectionState::Unpaired
        })
    }
}

/// Shared handle to the mediator state, cloned into every connection task
/// and HTTP handler via `Arc`.
pub struct Mediator {
    state: Mutex<MediatorState>,
    writer: Option<SnapshotWriter>,
}

impl Mediator {
    /// A mediator that keeps everything in memory only.
    pub fn new(snapshot: Snapshot) -> Self {
        Self::build(snapshot, None)
    }

    /// A mediator that schedules a snapshot write after every sanction or
    /// report mutation.
    pub fn with_writer(snapshot: Snapshot, writer: SnapshotWriter) -> Self {
        Self::build(snapshot, Some(writer))
    }

    fn build(snapshot: Snapshot, writer: Option<SnapshotWriter>) -> Self {
        let state = MediatorState {
            sanctions: SanctionStore::from_records(snapshot.sanctions),
            reports: ReportStore::from_records(snapshot.reports),
            ..MediatorState::default()
        };
        Self {
            state: Mutex::new(state),
            writer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MediatorState> {
        // State is left consistent between statements, so a panic elsewhere
        // does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queued while the lock is still held so snapshots reach the writer
    /// in mutation order.
    fn persist(&self, state: &MediatorState) {
        if let Some(writer) = &self.writer {
            writer.schedule(state.snapshot());
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────────

    /// Admits a new connection unless its IP holds an active ban.
    ///
    /// A banned connection is sent `end` on `outbound` and rejected; the
    /// transport is expected to close it. Mutes do not block connecting.
    pub fn connect(&self, ip: impl Into<String>, outbound: Sender<ServerEvent>) -> Result<ConnectionId> {
        let ip = ip.into();
        let mut state = self.lock();
        if state.sanctions.is_banned(&ip, now()) {
            let _ = outbound.try_send(ServerEvent::End);
            info!(%ip, "rejected banned connection");
            return Err(AppError::Banned(ip));
        }
        let id = ConnectionId::new();
        state.registry.insert(Connection::new(id, ip, outbound));
        debug!(connection = %id, online = state.registry.len(), "connected");
        Ok(id)
    }

    /// Dispatches one inbound client event.
    pub fn handle(&self, id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::FindPartner(preferences) => self.find_partner(id, preferences),
            ClientEvent::Message(payload) => {
                self.send_message(id, payload);
            }
            ClientEvent::Next => self.next(id),
            ClientEvent::End => self.end(id),
            ClientEvent::Cancel => self.cancel_waiting(id),
        }
    }

    pub fn find_partner(&self, id: ConnectionId, preferences: Option<Value>) {
        self.lock().request_pairing(id, preferences);
    }

    pub fn send_message(&self, id: ConnectionId, payload: Value) -> RelayOutcome {
        let state = self.lock();
        let outcome = relay_message(&state.registry, &state.sanctions, id, payload, now());
        if outcome == RelayOutcome::Suppressed {
            debug!(connection = %id, "message suppressed by sanction");
        }
        outcome
    }

    /// Ends the current pairing and re-enters the queue immediately.
    pub fn next(&self, id: ConnectionId) {
        self.lock().next(id);
    }

    /// Ends the current pairing and leaves the connection idle.
    pub fn end(&self, id: ConnectionId) {
        self.lock().end(id);
    }

    pub fn cancel_waiting(&self, id: ConnectionId) {
        self.lock().matcher.cancel(id);
    }

    /// Tears down pairing and waiting state and forgets the connection.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut state = self.lock();
        state.disconnect(id);
        debug!(connection = %id, online = state.registry.len(), "disconnected");
    }

    pub fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.lock().state_of(id)
    }

    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.lock().registry.partner_of(id)
    }

    pub fn waiting_connection(&self) -> Option<ConnectionId> {
        self.lock().matcher.waiting().map(|slot| slot.connection)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().registry.len()
    }

    // ── Sanctions ───────────────────────────────────────────────────────────

    pub fn apply_sanction(&self, ip: &str, ban_type: BanType) -> Arc<Sanction> {
        let mut state = self.lock();
        let sanction = state.sanctions.apply(ip, ban_type, now());
        self.persist(&state);
        info!(%ip, ban_type = %ban_type, "sanction applied");
        sanction
    }

    pub fn clear_sanction(&self, ip: &str) -> bool {
        let mut state = self.lock();
        let existed = state.sanctions.clear(ip);
        self.persist(&state);
        info!(%ip, existed, "sanction cleared");
        existed
    }

    pub fn is_active(&self, ip: &str) -> bool {
        self.lock().sanctions.is_active(ip, now())
    }

    pub fn can_send(&self, ip: &str) -> bool {
        self.lock().sanctions.can_send(ip, now())
    }

    pub fn sanction_view(&self, ip: &str) -> SanctionView {
        self.lock().sanctions.view(ip, now())
    }

    pub fn list_sanctions(&self) -> Vec<Arc<Sanction>> {
        self.lock().sanctions.list()
    }

    // ── Reports ─────────────────────────────────────────────────────────────

    pub fn submit_report(&self, ip: &str, fields: Map<String, Value>) -> Arc<Report> {
        let mut state = self.lock();
        let report = state.reports.submit(ip, fields, now());
        self.persist(&state);
        info!(report = %report.id, "report received");
        report
    }

    pub fn list_reports(&self) -> Vec<Arc<Report>> {
        self.lock().reports.list().to_vec()
    }

    pub fn get_report(&self, id: &str) -> Result<Arc<Report>> {
        self.lock()
            .reports
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Report".into(), id.to_string()))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    /// Persists the current state and waits for the write to land.
    /// Returns `true` when there is no writer (nothing to persist).
    pub async fn flush(&self) -> bool {
        let Some(writer) = &self.writer else {
            return true;
        };
        let pending = {
            let state = self.lock();
            writer.flush(state.snapshot())
        };
        pending.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::{self, Receiver};

    use crate::registry::OUTBOUND_CAPACITY;

    fn join(mediator: &Mediator, ip: &str) -> (ConnectionId, Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = mediator.connect(ip, tx).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn two_requests_pair_symmetrically() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, mut ra) = join(&mediator, "1.1.1.1");
        let (b, mut rb) = join(&mediator, "2.2.2.2");

        mediator.find_partner(a, None);
        assert_eq!(mediator.state_of(a), Some(ConnectionState::Waiting));
        assert!(drain(&mut ra).is_empty());

        mediator.find_partner(b, Some(json!({"lang": "en"})));
        assert_eq!(mediator.partner_of(a), Some(b));
        assert_eq!(mediator.partner_of(b), Some(a));
        assert_eq!(drain(&mut ra), vec![ServerEvent::Matched]);
        assert_eq!(drain(&mut rb), vec![ServerEvent::Matched]);
        assert_eq!(mediator.waiting_connection(), None);
    }

    #[test]
    fn at_most_one_connection_waits() {
        let mediator = Mediator::new(Snapshot::default());
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (id, rx) = join(&mediator, &format!("10.0.0.{i}"));
            ids.push(id);
            receivers.push(rx);
        }
        for id in &ids {
            mediator.find_partner(*id, None);
        }

        let waiting: Vec<_> = ids
            .iter()
            .filter(|id| mediator.state_of(**id) == Some(ConnectionState::Waiting))
            .collect();
        assert_eq!(waiting, vec![&ids[4]]);
        for id in &ids[..4] {
            let partner = mediator.partner_of(*id).unwrap();
            assert_eq!(mediator.partner_of(partner), Some(*id));
        }
    }

    #[test]
    fn find_partner_twice_keeps_one_slot() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");

        mediator.find_partner(a, None);
        mediator.find_partner(a, None);
        assert_eq!(mediator.waiting_connection(), Some(a));
        assert_eq!(mediator.partner_of(a), None);
    }

    #[test]
    fn find_partner_while_paired_is_ignored() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");
        let (b, _rb) = join(&mediator, "2.2.2.2");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);

        mediator.find_partner(a, None);
        assert_eq!(mediator.partner_of(a), Some(b));
        assert_eq!(mediator.waiting_connection(), None);
    }

    #[test]
    fn disconnect_tears_down_pairing() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");
        let (b, mut rb) = join(&mediator, "2.2.2.2");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);
        drain(&mut rb);

        mediator.disconnect(a);
        assert_eq!(mediator.state_of(a), None);
        assert_eq!(mediator.state_of(b), Some(ConnectionState::Unpaired));
        assert_eq!(drain(&mut rb), vec![ServerEvent::End]);
        assert_eq!(mediator.connection_count(), 1);
    }

    #[test]
    fn disconnect_while_waiting_frees_the_slot() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");
        let (b, _rb) = join(&mediator, "2.2.2.2");

        mediator.find_partner(a, None);
        mediator.disconnect(a);
        assert_eq!(mediator.waiting_connection(), None);

        mediator.find_partner(b, None);
        assert_eq!(mediator.state_of(b), Some(ConnectionState::Waiting));
    }

    #[test]
    fn end_leaves_both_idle() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, mut ra) = join(&mediator, "1.1.1.1");
        let (b, mut rb) = join(&mediator, "2.2.2.2");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);
        drain(&mut ra);
        drain(&mut rb);

        mediator.end(a);
        assert_eq!(drain(&mut rb), vec![ServerEvent::End]);
        assert!(drain(&mut ra).is_empty());
        assert_eq!(mediator.state_of(a), Some(ConnectionState::Unpaired));
        assert_eq!(mediator.state_of(b), Some(ConnectionState::Unpaired));
        assert_eq!(mediator.waiting_connection(), None);
    }

    #[test]
    fn cancel_clears_only_own_waiting_slot() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");
        let (b, _rb) = join(&mediator, "2.2.2.2");

        mediator.find_partner(a, None);
        mediator.handle(b, ClientEvent::Cancel);
        assert_eq!(mediator.waiting_connection(), Some(a));
        mediator.handle(a, ClientEvent::Cancel);
        assert_eq!(mediator.waiting_connection(), None);
        assert_eq!(mediator.state_of(a), Some(ConnectionState::Unpaired));
    }

    #[test]
    fn next_pairs_immediately_when_someone_waits() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, mut ra) = join(&mediator, "1.1.1.1");
        let (b, mut rb) = join(&mediator, "2.2.2.2");
        let (c, mut rc) = join(&mediator, "3.3.3.3");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);
        mediator.find_partner(c, None);
        drain(&mut ra);
        drain(&mut rb);

        mediator.next(b);
        assert_eq!(drain(&mut ra), vec![ServerEvent::End]);
        assert_eq!(drain(&mut rb), vec![ServerEvent::Matched]);
        assert_eq!(drain(&mut rc), vec![ServerEvent::Matched]);
        assert_eq!(mediator.partner_of(b), Some(c));
    }

    #[test]
    fn next_reuses_last_preferences() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");
        mediator.find_partner(a, Some(json!({"lang": "fr"})));
        mediator.cancel_waiting(a);

        mediator.next(a);
        let state = mediator.lock();
        let slot = state.matcher.waiting().unwrap();
        assert_eq!(slot.connection, a);
        assert_eq!(slot.preferences, Some(json!({"lang": "fr"})));
    }

    #[test]
    fn banned_ip_is_rejected_with_end() {
        let mediator = Mediator::new(Snapshot::default());
        mediator.apply_sanction("6.6.6.6", BanType::ThreeDays);

        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let result = mediator.connect("6.6.6.6", tx);
        assert_eq!(result, Err(AppError::Banned("6.6.6.6".into())));
        assert_eq!(drain(&mut rx), vec![ServerEvent::End]);
        assert_eq!(mediator.connection_count(), 0);
    }

    #[test]
    fn muted_ip_connects_and_pairs_but_cannot_send() {
        let mediator = Mediator::new(Snapshot::default());
        mediator.apply_sanction("7.7.7.7", BanType::FifteenMinutes);
        let (a, mut ra) = join(&mediator, "7.7.7.7");
        let (b, mut rb) = join(&mediator, "8.8.8.8");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);
        drain(&mut ra);
        drain(&mut rb);

        assert_eq!(mediator.send_message(a, json!("hi")), RelayOutcome::Suppressed);
        assert!(drain(&mut rb).is_empty());
        assert!(drain(&mut ra).is_empty());

        assert_eq!(mediator.send_message(b, json!("yo")), RelayOutcome::Delivered(a));
        assert_eq!(drain(&mut ra), vec![ServerEvent::Message(json!("yo"))]);
    }

    #[test]
    fn ban_mid_session_blocks_sends_without_disconnecting() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "7.7.7.7");
        let (b, mut rb) = join(&mediator, "8.8.8.8");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);
        drain(&mut rb);

        mediator.apply_sanction("7.7.7.7", BanType::Forever);
        assert_eq!(mediator.state_of(a), Some(ConnectionState::Paired));
        mediator.send_message(a, json!("hi"));
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn unban_restores_sending() {
        let mediator = Mediator::new(Snapshot::default());
        mediator.apply_sanction("7.7.7.7", BanType::FifteenMinutes);
        assert!(!mediator.can_send("7.7.7.7"));
        assert!(mediator.clear_sanction("7.7.7.7"));
        assert!(mediator.can_send("7.7.7.7"));
        assert!(!mediator.is_active("7.7.7.7"));
        assert!(mediator.list_sanctions().is_empty());
    }

    #[test]
    fn unknown_report_is_not_found() {
        let mediator = Mediator::new(Snapshot::default());
        assert!(matches!(
            mediator.get_report("nope"),
            Err(AppError::NotFound(_, _))
        ));
    }

    #[tokio::test]
    async fn mutations_schedule_snapshot_writes() {
        use crate::traits::MockSnapshotStore;

        let mut store = MockSnapshotStore::new();
        store
            .expect_save()
            .withf(|snapshot| snapshot.sanctions.len() <= 1)
            .returning(|_| Ok(()))
            .times(1..=3);

        let (writer, handle) = SnapshotWriter::spawn(Arc::new(store));
        let mediator = Mediator::with_writer(Snapshot::default(), writer);
        mediator.apply_sanction("1.2.3.4", BanType::ThreeDays);
        mediator.submit_report("5.6.7.8", Map::new());
        mediator.clear_sanction("1.2.3.4");
        drop(mediator);

        handle.await.unwrap();
    }

    #[test]
    fn silent_partner_does_not_grow_its_queue() {
        let mediator = Mediator::new(Snapshot::default());
        let (a, _ra) = join(&mediator, "1.1.1.1");
        let (b, rb) = join(&mediator, "2.2.2.2");
        mediator.find_partner(a, None);
        mediator.find_partner(b, None);

        let payload = json!("x".repeat(1024));
        for _ in 0..OUTBOUND_CAPACITY * 10 {
            mediator.send_message(a, payload.clone());
        }

        assert_eq!(rb.len(), OUTBOUND_CAPACITY);
        assert_eq!(mediator.partner_of(a), Some(b));
        assert_eq!(mediator.send_message(a, payload), RelayOutcome::Dropped);
    }

    #[test]
    fn snapshot_shares_records_with_live_state() {
        let mediator = Mediator::new(Snapshot::default());
        for i in 0..100 {
            mediator.submit_report(&format!("10.0.0.{i}"), Map::new());
        }
        let sanction = mediator.apply_sanction("1.2.3.4", BanType::ThreeDays);

        let first = mediator.snapshot();
        let second = mediator.snapshot();

        assert_eq!(first.reports.len(), 100);
        assert!(first
            .reports
            .iter()
            .zip(&second.reports)
            .all(|(x, y)| Arc::ptr_eq(x, y)));
        assert!(Arc::ptr_eq(&first.sanctions[0], &sanction));
    }
}
