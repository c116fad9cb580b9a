//! Kitchen order board - remote order sync and status pipeline.
//!
//! Keeps a local view of a store's active orders consistent with the remote
//! order store, advances orders through the preparation lifecycle, and
//! raises each new-order/urgent/ready alert at most once. Rendering,
//! printing, and payments live elsewhere; this crate is the sync core plus
//! the interfaces those collaborators consume.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod alerts;
pub mod api;
pub mod config;
pub mod model;
pub mod status;
pub mod store;
pub mod sync;

pub use alerts::{AlertDispatcher, AlertSink, LogAlertSink, DEFAULT_URGENT_THRESHOLD_MINUTES};
pub use api::{ConnectivityResult, HttpOrderStore};
pub use config::BoardConfig;
pub use model::{Order, OrderItem, OrderSnapshot, OrderType, SnapshotSource};
pub use status::OrderStatus;
pub use store::{OrderStore, SignalFn, StoreError, Subscription};
pub use sync::{LoadOutcome, SyncController, SyncError, SyncOptions};

/// Initialize structured logging: console layer always, plus a daily-rolling
/// JSON file layer when `log_dir` is given.
///
/// Uses `RUST_LOG` when set, defaulting to `info` globally and `debug` for
/// this crate.
pub fn init_tracing(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kitchen_board=debug"));

    let file_layer = log_dir.map(|dir| {
        std::fs::create_dir_all(dir).ok();
        let file_appender = tracing_appender::rolling::daily(dir, "board");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Dropping the guard flushes and stops the writer; the board logs
        // until process exit, so keep it alive for the process lifetime.
        std::mem::forget(guard);
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
    });

    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}
