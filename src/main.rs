//! Kitchen board daemon.
//!
//! Composition root: loads config, wires the HTTP order store into the sync
//! controller, starts the realtime subscription and the auto-refresh timer,
//! and logs board changes until interrupted.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use kitchen_board::{model, BoardConfig, HttpOrderStore, LogAlertSink, SyncController, SyncOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = BoardConfig::load(config_path.as_deref().map(Path::new))
        .map_err(anyhow::Error::msg)
        .context("failed to load board configuration")?;

    kitchen_board::init_tracing(config.log_dir.as_deref());
    info!("Starting kitchen board v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        HttpOrderStore::new(&config.store_url, &config.api_key)
            .context("failed to initialise order store client")?,
    );

    let probe = store.test_connectivity().await;
    if probe.success {
        info!(latency_ms = ?probe.latency_ms, "order store reachable");
    } else {
        warn!(error = ?probe.error, "order store unreachable at startup; will keep retrying");
    }

    let fallback = config
        .sample_fallback
        .then(|| model::sample_orders(Utc::now()));
    let controller = SyncController::new(
        store,
        Arc::new(LogAlertSink),
        SyncOptions {
            urgent_threshold_minutes: config.urgent_threshold_minutes,
            fallback_orders: fallback,
        },
    );

    if let Err(e) = controller.load(&config.store_id).await {
        warn!(error = %e, "initial load failed; keeping empty board until a refresh succeeds");
    }
    controller.start_realtime(&config.store_id);
    controller.start_auto_refresh(&config.store_id, Duration::from_secs(config.auto_refresh_secs));

    let mut snapshots = controller.snapshots();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let counts: Vec<String> = snapshot
                    .status_counts()
                    .into_iter()
                    .filter(|(_, n)| *n > 0)
                    .map(|(status, n)| format!("{status}={n}"))
                    .collect();
                info!(
                    orders = snapshot.orders.len(),
                    columns = %counts.join(" "),
                    realtime = controller.realtime_active(),
                    "board updated"
                );
            }
        }
    }

    info!("Shutting down kitchen board");
    controller.shutdown().await;
    Ok(())
}
