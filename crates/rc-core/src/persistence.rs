//! # Snapshot Writer
//!
//! Background task that persists snapshots off the request path. Callers
//! hand over a full snapshot after each mutation; the task coalesces
//! whatever queued up while it was busy and saves only the newest.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::Snapshot;
use crate::traits::SnapshotStore;

struct WriteRequest {
    snapshot: Snapshot,
    /// Set by `flush`; receives whether the save that covered it succeeded.
    done: Option<oneshot::Sender<bool>>,
}

#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl SnapshotWriter {
    /// Spawns the writer on the current tokio runtime.
    ///
    /// The task ends once every `SnapshotWriter` clone is dropped and the
    /// queue is drained.
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(store, rx));
        (Self { tx }, handle)
    }

    /// Queues `snapshot` for writing. Never blocks; failures are logged only.
    pub fn schedule(&self, snapshot: Snapshot) {
        let request = WriteRequest {
            snapshot,
            done: None,
        };
        if self.tx.send(request).is_err() {
            warn!("snapshot writer has stopped, change not persisted");
        }
    }

    /// Queues `snapshot` and resolves once it (or a newer one) is on disk.
    ///
    /// The request is queued before this returns, so the returned future
    /// can be awaited after any lock guarding the state is released.
    pub fn flush(&self, snapshot: Snapshot) -> impl Future<Output = bool> + Send + 'static {
        let (done, saved) = oneshot::channel();
        let request = WriteRequest {
            snapshot,
            done: Some(done),
        };
        let queued = self.tx.send(request).is_ok();
        async move { queued && saved.await.unwrap_or(false) }
    }
}

async fn run(store: Arc<dyn SnapshotStore>, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(first) = rx.recv().await {
        let mut latest = first.snapshot;
        let mut waiters: Vec<oneshot::Sender<bool>> = first.done.into_iter().collect();
        let mut coalesced = 0usize;
        while let Ok(newer) = rx.try_recv() {
            latest = newer.snapshot;
            waiters.extend(newer.done);
            coalesced += 1;
        }

        let saved = match store.save(&latest).await {
            Ok(()) => {
                debug!(
                    reports = latest.reports.len(),
                    sanctions = latest.sanctions.len(),
                    coalesced,
                    "snapshot saved"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "snapshot save failed");
                false
            }
        };
        for waiter in waiters {
            let _ = waiter.send(saved);
        }
    }
}
