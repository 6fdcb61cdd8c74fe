//! # rc-store-json
//! rusty-chat/crates/rc-plugins/rc-store-json/src/lib.rs
//! Single-file JSON implementation of `SnapshotStore`.
//! Features: tolerant loading, whole-file replacement via temp-file rename.

use async_trait::async_trait;
use rc_core::models::{Report, Sanction, Snapshot};
use rc_core::traits::SnapshotStore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub struct JsonSnapshotStore {
    /// Snapshot file (e.g., "./data.json")
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file the next snapshot is written to before the rename.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    /// Reads the snapshot file. A missing, empty or unparsable file yields
    /// an empty snapshot; individual malformed entries are skipped.
    async fn load(&self) -> anyhow::Result<Snapshot> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot file, starting empty");
                return Ok(Snapshot::default());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot unreadable, starting empty");
                return Ok(Snapshot::default());
            }
        };
        let snapshot = decode(&raw);
        debug!(
            path = %self.path.display(),
            reports = snapshot.reports.len(),
            sanctions = snapshot.sanctions.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Writes the whole snapshot to a temp file, flushes it, then renames it
    /// over the target so a failed write never leaves a torn file behind.
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn decode(raw: &str) -> Snapshot {
    if raw.trim().is_empty() {
        return Snapshot::default();
    }
    let root: Value = match serde_json::from_str(raw) {
        Ok(root) => root,
        Err(e) => {
            warn!(error = %e, "snapshot is not valid JSON, starting empty");
            return Snapshot::default();
        }
    };

    let reports: Vec<Arc<Report>> = entries(&root, "reports");
    let sanctions = entries::<Arc<Sanction>>(&root, "sanctions")
        .into_iter()
        .filter(|s| !s.ip.is_empty())
        .collect();
    Snapshot { reports, sanctions }
}

/// Decodes each element of `root[key]`, dropping the ones that don't fit.
fn entries<T: DeserializeOwned>(root: &Value, key: &str) -> Vec<T> {
    let Some(items) = root.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key, error = %e, "skipping malformed snapshot entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rc_core::models::{BanType, SanctionEvent, SanctionStatus};

    fn sample() -> Snapshot {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let until = Utc.timestamp_millis_opt(1_700_259_200_000).unwrap();
        let mut fields = serde_json::Map::new();
        fields.insert("reason".into(), Value::from("abuse"));
        Snapshot {
            reports: vec![Arc::new(Report {
                id: "r-1".into(),
                created_at: at,
                ip: "9.9.9.9".into(),
                fields,
            })],
            sanctions: vec![Arc::new(Sanction {
                ip: "1.2.3.4".into(),
                status: SanctionStatus::Ban,
                ban_type: BanType::ThreeDays,
                expires_at: Some(until),
                history: vec![SanctionEvent {
                    at,
                    ban_type: BanType::ThreeDays,
                    until: Some(until),
                }],
            })],
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("data.json"));

        store.save(&sample()).await.unwrap();
        let loaded = JsonSnapshotStore::new(store.path()).load().await.unwrap();

        assert_eq!(loaded, sample());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn missing_empty_and_garbage_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let store = JsonSnapshotStore::new(&path);

        assert_eq!(store.load().await.unwrap(), Snapshot::default());

        std::fs::write(&path, "").unwrap();
        assert_eq!(store.load().await.unwrap(), Snapshot::default());

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(store.load().await.unwrap(), Snapshot::default());
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{
              "reports": [{"id": "1", "createdAt": 1700000000000, "ip": "1.1.1.1", "reason": "x"}, 42],
              "sanctions": [
                {"ip": "1.2.3.4", "status": "mute", "banType": "15m", "expiresAt": 1700000900000,
                 "history": [{"at": 1700000000000, "type": "15m", "until": 1700000900000}]},
                {"status": "ban", "banType": "forever", "expiresAt": null},
                {"ip": "5.5.5.5", "status": "ban", "banType": "1y", "expiresAt": null}
              ]
            }"#,
        )
        .unwrap();

        let loaded = JsonSnapshotStore::new(&path).load().await.unwrap();
        assert_eq!(loaded.reports.len(), 1);
        assert_eq!(loaded.sanctions.len(), 1);
        assert_eq!(loaded.sanctions[0].ban_type, BanType::FifteenMinutes);
    }

    #[tokio::test]
    async fn save_replaces_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested").join("data.json"));

        store.save(&sample()).await.unwrap();
        store.save(&Snapshot::default()).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Snapshot::default());
    }
}
