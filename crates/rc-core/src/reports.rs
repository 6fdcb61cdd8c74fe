//! # Report Store
//!
//! Append-only collection of abuse reports in arrival order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::Report;

/// Keys the server stamps itself; callers cannot supply them.
const STAMPED_KEYS: [&str; 3] = ["id", "createdAt", "ip"];

#[derive(Debug, Default, Clone)]
pub struct ReportStore {
    reports: Vec<Arc<Report>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(reports: Vec<Arc<Report>>) -> Self {
        Self { reports }
    }

    /// Stamps and appends a report built from caller-supplied fields.
    pub fn submit(&mut self, ip: &str, mut fields: Map<String, Value>, now: DateTime<Utc>) -> Arc<Report> {
        for key in STAMPED_KEYS {
            fields.remove(key);
        }
        let report = Arc::new(Report {
            id: Uuid::now_v7().to_string(),
            created_at: now,
            ip: ip.to_string(),
            fields,
        });
        self.reports.push(Arc::clone(&report));
        report
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Report>> {
        self.reports.iter().find(|r| r.id == id)
    }

    pub fn list(&self) -> &[Arc<Report>] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
