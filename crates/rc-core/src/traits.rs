//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;

use crate::models::Snapshot;

/// Durable storage contract for the {Reports, Sanctions} snapshot.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Reads the last saved snapshot. Implementations treat a missing,
    /// empty or unparsable source as an empty snapshot rather than failing.
    async fn load(&self) -> anyhow::Result<Snapshot>;

    /// Replaces the stored snapshot as a whole.
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
}

/// Admin credential contract for the moderation API.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait AdminAuth: Send + Sync {
    /// Returns true when `presented` matches the configured admin key.
    fn verify_admin_key(&self, presented: &str) -> bool;
}
