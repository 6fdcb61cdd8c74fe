//! # Sanction Store
//!
//! Authoritative mute/ban state per IP. Every call takes an explicit `now`
//! so expiry is evaluated against absolute wall-clock time supplied by the
//! caller.
//!
//! Records are held behind `Arc` and updated copy-on-write, so a snapshot
//! handed to the writer never observes later changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{BanType, Sanction, SanctionEvent, SanctionView};

#[derive(Debug, Default, Clone)]
pub struct SanctionStore {
    records: BTreeMap<String, Arc<Sanction>>,
}

impl SanctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the store from its persisted array form.
    ///
    /// Later entries for the same IP replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = Arc<Sanction>>) -> Self {
        Self {
            records: records
                .into_iter()
                .filter(|s| !s.ip.is_empty())
                .map(|s| (s.ip.clone(), s))
                .collect(),
        }
    }

    /// Applies `ban_type` to `ip`, replacing whatever was there.
    ///
    /// Sanctions never stack: the newest call wins even when it is weaker
    /// than the one it replaces. History is the only thing carried over.
    pub fn apply(&mut self, ip: &str, ban_type: BanType, now: DateTime<Utc>) -> Arc<Sanction> {
        let expires_at = ban_type.duration().map(|d| now + d);
        let event = SanctionEvent {
            at: now,
            ban_type,
            until: expires_at,
        };

        let entry = self.records.entry(ip.to_string()).or_insert_with(|| {
            Arc::new(Sanction {
                ip: ip.to_string(),
                status: ban_type.status(),
                ban_type,
                expires_at,
                history: Vec::new(),
            })
        });
        let record = Arc::make_mut(entry);
        record.status = ban_type.status();
        record.ban_type = ban_type;
        record.expires_at = expires_at;
        record.history.push(event);
        Arc::clone(entry)
    }

    pub fn is_active(&self, ip: &str, now: DateTime<Utc>) -> bool {
        self.records
            .get(ip)
            .is_some_and(|s| s.is_active_at(now))
    }

    /// Any active sanction blocks sending; there is no active class that
    /// still permits it.
    pub fn can_send(&self, ip: &str, now: DateTime<Utc>) -> bool {
        !self
            .records
            .get(ip)
            .is_some_and(|s| s.blocks_sending_at(now))
    }

    /// Only an active ban (not a mute) keeps a client from connecting.
    pub fn is_banned(&self, ip: &str, now: DateTime<Utc>) -> bool {
        self.records
            .get(ip)
            .is_some_and(|s| s.blocks_connecting_at(now))
    }

    /// Removes the record, history included. Returns whether one existed.
    pub fn clear(&mut self, ip: &str) -> bool {
        self.records.remove(ip).is_some()
    }

    pub fn get(&self, ip: &str) -> Option<&Arc<Sanction>> {
        self.records.get(ip)
    }

    /// Self-status as reported to the sanctioned client.
    pub fn view(&self, ip: &str, now: DateTime<Utc>) -> SanctionView {
        match self.records.get(ip) {
            Some(s) if s.is_active_at(now) => SanctionView::active(s),
            _ => SanctionView::inactive(),
        }
    }

    /// Every stored record, expired ones included, ordered by IP.
    pub fn list(&self) -> Vec<Arc<Sanction>> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
