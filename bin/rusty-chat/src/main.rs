//! # Rusty-Chat Binary
//!
//! The entry point that assembles the mediator, its plugins and the web server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use configs::{LogSettings, Settings, DEFAULT_ADMIN_KEY};
use rc_api::AppState;
use rc_auth_simple::AdminKeyAuth;
use rc_core::{Mediator, SnapshotStore, SnapshotWriter};
use rc_store_json::JsonSnapshotStore;
use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log);

    // 1. Restore moderation state
    let store = Arc::new(JsonSnapshotStore::new(&settings.storage.snapshot_path));
    let snapshot = store.load().await.context("loading snapshot")?;
    info!(
        path = %store.path().display(),
        reports = snapshot.reports.len(),
        sanctions = snapshot.sanctions.len(),
        "snapshot restored"
    );

    // 2. Mediator with its background writer
    let (writer, writer_task) = SnapshotWriter::spawn(store.clone());
    let mediator = Arc::new(Mediator::with_writer(snapshot, writer));

    // 3. Admin auth
    if settings.admin.key.expose_secret() == DEFAULT_ADMIN_KEY {
        warn!("using the built-in admin key; set ADMIN_KEY before exposing this server");
    }
    let auth = Arc::new(AdminKeyAuth::new(settings.admin.key.clone()));

    // 4. Shared state and routes
    let state = AppState {
        mediator: mediator.clone(),
        auth,
        trust_forwarded_for: settings.proxy.trust_forwarded_for,
    };
    let app = rc_api::router(state);

    let addr = settings.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("🚀 Rusty-Chat starting on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // Goes through the writer so it cannot interleave with a pending save.
    if mediator.flush().await {
        info!("final snapshot saved");
    } else {
        warn!("final snapshot save failed");
    }

    // The writer exits once the last mediator handle is gone. Upgraded
    // sockets may still hold one, so the wait is bounded.
    drop(mediator);
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(())) => info!("snapshot writer stopped"),
        Ok(Err(e)) => warn!(error = %e, "snapshot writer task failed"),
        Err(_) => warn!("snapshot writer still referenced by open sockets, exiting anyway"),
    }
    Ok(())
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
