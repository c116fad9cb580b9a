//! Order sync controller.
//!
//! Reconciles two independent refresh producers — the auto-refresh timer and
//! the push subscription — into one consumer task that exclusively owns the
//! local order collection and the set of already-observed order IDs. Both
//! producers funnel through a capacity-1 refresh channel: while a load is in
//! flight, at most one re-run stays queued and further triggers coalesce
//! into it. Merges are synchronous and atomic from the consumer's view; the
//! only suspension points are the remote fetch and the remote status write.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::alerts::AlertDispatcher;
use crate::model::{Order, OrderSnapshot, SnapshotSource};
use crate::status::OrderStatus;
use crate::store::{OrderStore, SignalFn, StoreError, Subscription};

/// Queued commands the consumer task can hold before callers back off.
const COMMAND_QUEUE_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("order fetch failed: {0}")]
    Fetch(#[source] StoreError),
    #[error("status update failed: {0}")]
    Update(#[source] StoreError),
    #[error("order {0} is not on the board")]
    UnknownOrder(String),
    #[error("order {0} is already {1} and cannot advance")]
    NoNextStatus(String, OrderStatus),
    #[error("order {0} already has status {1}")]
    StatusUnchanged(String, OrderStatus),
    #[error("sync controller has shut down")]
    Closed,
}

// ---------------------------------------------------------------------------
// Public option/result types
// ---------------------------------------------------------------------------

/// Construction options for the controller.
pub struct SyncOptions {
    pub urgent_threshold_minutes: i64,
    /// Substitute data for the very first load, applied at most once and
    /// only while no fetch has ever succeeded.
    pub fallback_orders: Option<Vec<Order>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            urgent_threshold_minutes: crate::alerts::DEFAULT_URGENT_THRESHOLD_MINUTES,
            fallback_orders: None,
        }
    }
}

/// Result of one explicit `load` call.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The full collection after the merge.
    pub orders: Vec<Order>,
    /// IDs observed for the first time by this merge.
    pub new_order_ids: Vec<String>,
    pub used_fallback: bool,
}

/// What prompted a scheduled refresh. Logging only.
#[derive(Debug, Clone, Copy)]
enum RefreshTrigger {
    Timer,
    Push,
}

struct RefreshRequest {
    store_id: String,
    trigger: RefreshTrigger,
}

enum Command {
    Load {
        store_id: String,
        reply: oneshot::Sender<Result<LoadOutcome, SyncError>>,
    },
    UpdateStatus {
        order_id: String,
        new_status: OrderStatus,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Advance {
        order_id: String,
        reply: oneshot::Sender<Result<OrderStatus, SyncError>>,
    },
    Override {
        order_id: String,
        new_status: OrderStatus,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
}

// ---------------------------------------------------------------------------
// Consumer-owned state
// ---------------------------------------------------------------------------

/// Result of merging one fetched batch into the local collection.
struct MergeResult {
    new_orders: Vec<Order>,
    became_ready: Vec<Order>,
    observed_at: DateTime<Utc>,
}

/// The two structures only the consumer task may touch: the materialized
/// order collection and the process-lifetime set of observed order IDs.
struct BoardState {
    orders: Vec<Order>,
    known_ids: HashSet<String>,
    had_remote_load: bool,
    fallback_applied: bool,
    refreshed_at: Option<DateTime<Utc>>,
    source: SnapshotSource,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl BoardState {
    fn new() -> Self {
        Self {
            orders: Vec::new(),
            known_ids: HashSet::new(),
            had_remote_load: false,
            fallback_applied: false,
            refreshed_at: None,
            source: SnapshotSource::NotLoaded,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Replace the collection with `fetched` and compute the merge events.
    ///
    /// The new-order delta is `fetched − known`, taken strictly before the
    /// known set is unioned, so re-delivering an identical batch yields an
    /// empty delta and an unchanged known set regardless of array order.
    fn merge(&mut self, fetched: Vec<Order>, observed_at: DateTime<Utc>) -> MergeResult {
        let previous_status: HashMap<String, OrderStatus> = self
            .orders
            .iter()
            .map(|o| (o.id.clone(), o.status))
            .collect();

        let mut new_orders = Vec::new();
        let mut delta_ids = HashSet::new();
        let mut became_ready = Vec::new();
        for order in &fetched {
            if !self.known_ids.contains(&order.id) && delta_ids.insert(order.id.clone()) {
                new_orders.push(order.clone());
            }
            if order.status == OrderStatus::Ready
                && matches!(previous_status.get(&order.id), Some(s) if *s != OrderStatus::Ready)
            {
                became_ready.push(order.clone());
            }
        }

        // Full replacement; the remote store is the authority on existence.
        self.orders = fetched;
        for order in &self.orders {
            self.known_ids.insert(order.id.clone());
        }

        MergeResult {
            new_orders,
            became_ready,
            observed_at,
        }
    }

    fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            orders: self.orders.clone(),
            refreshed_at: self.refreshed_at,
            source: self.source,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer task
// ---------------------------------------------------------------------------

struct Consumer {
    store: Arc<dyn OrderStore>,
    state: BoardState,
    dispatcher: AlertDispatcher,
    snapshot_tx: watch::Sender<OrderSnapshot>,
    fallback: Option<Vec<Order>>,
}

impl Consumer {
    fn publish(&self) {
        self.snapshot_tx.send_replace(self.state.snapshot());
    }

    fn load_outcome(&self, merge: &MergeResult, used_fallback: bool) -> LoadOutcome {
        LoadOutcome {
            orders: self.state.orders.clone(),
            new_order_ids: merge.new_orders.iter().map(|o| o.id.clone()).collect(),
            used_fallback,
        }
    }

    async fn run_load(&mut self, store_id: &str) -> Result<LoadOutcome, SyncError> {
        match self.store.fetch_orders(store_id).await {
            Ok(fetched) => {
                let now = Utc::now();
                let merge = self.state.merge(fetched, now);
                self.state.had_remote_load = true;
                self.state.consecutive_failures = 0;
                self.state.last_error = None;
                self.state.refreshed_at = Some(now);
                self.state.source = SnapshotSource::Remote;
                self.dispatcher
                    .dispatch(&merge.new_orders, &merge.became_ready, merge.observed_at);
                self.publish();
                debug!(
                    store_id,
                    orders = self.state.orders.len(),
                    new = merge.new_orders.len(),
                    "order snapshot refreshed"
                );
                Ok(self.load_outcome(&merge, false))
            }
            Err(err) => {
                self.state.consecutive_failures += 1;
                self.state.last_error = Some(err.to_string());
                if let StoreError::Decode(ref detail) = err {
                    warn!(store_id, error = %detail, "order batch rejected; keeping previous snapshot");
                } else {
                    warn!(
                        store_id,
                        error = %err,
                        failures = self.state.consecutive_failures,
                        "order fetch failed; keeping previous snapshot"
                    );
                }

                // One-shot substitution, allowed only while no fetch has
                // ever succeeded. It never overwrites real data.
                if !self.state.had_remote_load && !self.state.fallback_applied {
                    if let Some(fallback) = self.fallback.take() {
                        warn!(
                            store_id,
                            orders = fallback.len(),
                            "first load failed; substituting fallback order data"
                        );
                        let now = Utc::now();
                        let merge = self.state.merge(fallback, now);
                        self.state.fallback_applied = true;
                        self.state.refreshed_at = Some(now);
                        self.state.source = SnapshotSource::Fallback;
                        self.dispatcher.dispatch(
                            &merge.new_orders,
                            &merge.became_ready,
                            merge.observed_at,
                        );
                        self.publish();
                        return Ok(self.load_outcome(&merge, true));
                    }
                }

                self.publish();
                Err(SyncError::Fetch(err))
            }
        }
    }

    async fn run_update(
        &mut self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<(), SyncError> {
        // Remote confirmation first; the local collection is only touched
        // once the authority accepted the write.
        self.store
            .update_order_status(order_id, new_status)
            .await
            .map_err(|e| {
                warn!(order_id, status = %new_status, error = %e, "status update rejected; local state unchanged");
                SyncError::Update(e)
            })?;

        if let Some(order) = self.state.orders.iter_mut().find(|o| o.id == order_id) {
            order.status = new_status;
            self.publish();
            info!(order_id, status = %new_status, "order status updated");
        } else {
            info!(order_id, status = %new_status, "status updated for an order not in the active snapshot");
        }
        Ok(())
    }

    async fn run_advance(&mut self, order_id: &str) -> Result<OrderStatus, SyncError> {
        let current = self
            .state
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .map(|o| o.status)
            .ok_or_else(|| SyncError::UnknownOrder(order_id.to_string()))?;
        let next = current
            .next()
            .ok_or_else(|| SyncError::NoNextStatus(order_id.to_string(), current))?;
        self.run_update(order_id, next).await?;
        Ok(next)
    }

    async fn run_override(
        &mut self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<(), SyncError> {
        if let Some(current) = self
            .state
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .map(|o| o.status)
        {
            if current == new_status {
                return Err(SyncError::StatusUnchanged(order_id.to_string(), current));
            }
        }
        self.run_update(order_id, new_status).await
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Load { store_id, reply } => {
                let _ = reply.send(self.run_load(&store_id).await);
            }
            Command::UpdateStatus {
                order_id,
                new_status,
                reply,
            } => {
                let _ = reply.send(self.run_update(&order_id, new_status).await);
            }
            Command::Advance { order_id, reply } => {
                let _ = reply.send(self.run_advance(&order_id).await);
            }
            Command::Override {
                order_id,
                new_status,
                reply,
            } => {
                let _ = reply.send(self.run_override(&order_id, new_status).await);
            }
        }
    }
}

async fn consumer_loop(
    mut consumer: Consumer,
    mut commands: mpsc::Receiver<Command>,
    mut refresh_rx: mpsc::Receiver<RefreshRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = commands.recv() => match cmd {
                Some(cmd) => consumer.handle(cmd).await,
                None => break,
            },
            req = refresh_rx.recv() => match req {
                Some(req) => {
                    debug!(store_id = %req.store_id, trigger = ?req.trigger, "scheduled refresh");
                    if let Err(e) = consumer.run_load(&req.store_id).await {
                        debug!(error = %e, "scheduled refresh failed; next trigger retries");
                    }
                }
                None => break,
            },
        }
    }
    debug!("sync consumer stopped");
}

// ---------------------------------------------------------------------------
// Controller handle
// ---------------------------------------------------------------------------

/// Handle to the sync pipeline. Explicitly constructed and dependency-
/// injected; tests build isolated instances with in-process stores.
///
/// Must be created inside a tokio runtime: construction spawns the consumer
/// task that owns all order state.
pub struct SyncController {
    store: Arc<dyn OrderStore>,
    commands: mpsc::Sender<Command>,
    refresh_tx: mpsc::Sender<RefreshRequest>,
    snapshot_rx: watch::Receiver<OrderSnapshot>,
    realtime: Mutex<Option<Subscription>>,
    auto_refresh: Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl SyncController {
    pub fn new(
        store: Arc<dyn OrderStore>,
        sink: Arc<dyn crate::alerts::AlertSink>,
        options: SyncOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        // Capacity 1 is the coalescing rule: one pending re-run at most,
        // extra triggers land on a full channel and are dropped.
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (snapshot_tx, snapshot_rx) = watch::channel(OrderSnapshot::default());
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let consumer = Consumer {
            store: store.clone(),
            state: BoardState::new(),
            dispatcher: AlertDispatcher::new(sink, options.urgent_threshold_minutes),
            snapshot_tx,
            fallback: options.fallback_orders,
        };
        tracker.spawn(consumer_loop(
            consumer,
            commands_rx,
            refresh_rx,
            cancel.clone(),
        ));

        Self {
            store,
            commands: commands_tx,
            refresh_tx,
            snapshot_rx,
            realtime: Mutex::new(None),
            auto_refresh: Mutex::new(None),
            cancel,
            tracker,
        }
    }

    /// Fetch once, replace the collection, and return it with the
    /// new-order delta. On failure the previous snapshot is retained.
    pub async fn load(&self, store_id: &str) -> Result<LoadOutcome, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Load {
                store_id: store_id.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Write a status change to the remote store; mutate the local order
    /// only after the remote confirms.
    pub async fn update_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::UpdateStatus {
                order_id: order_id.to_string(),
                new_status,
                reply: tx,
            })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Advance an order along the canonical lifecycle (primary button).
    pub async fn advance(&self, order_id: &str) -> Result<OrderStatus, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Advance {
                order_id: order_id.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Staff correction: jump an order to any non-current status.
    pub async fn override_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Override {
                order_id: order_id.to_string(),
                new_status,
                reply: tx,
            })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Open the push channel. Each delivered signal schedules one coalesced
    /// refresh. Restarting replaces any previous subscription.
    pub fn start_realtime(&self, store_id: &str) {
        let refresh_tx = self.refresh_tx.clone();
        let signal_store_id = store_id.to_string();
        let on_signal: SignalFn = Arc::new(move || {
            match refresh_tx.try_send(RefreshRequest {
                store_id: signal_store_id.clone(),
                trigger: RefreshTrigger::Push,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("refresh already pending; push signal coalesced");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        });

        let subscription = self.store.subscribe_to_orders(store_id, on_signal);
        if let Ok(mut guard) = self.realtime.lock() {
            if let Some(previous) = guard.replace(subscription) {
                previous.cancel();
            }
        }
        info!(store_id, "realtime order subscription started");
    }

    /// Cancel the push subscription. Safe to call when not started; an
    /// in-flight load still completes and applies its result.
    pub fn stop_realtime(&self) {
        if let Ok(mut guard) = self.realtime.lock() {
            if let Some(subscription) = guard.take() {
                subscription.cancel();
                info!("realtime order subscription stopped");
            }
        }
    }

    /// Whether a subscription is open and its channel has not died. When
    /// this turns false the auto-refresh timer is the only liveness source.
    pub fn realtime_active(&self) -> bool {
        self.realtime
            .lock()
            .map(|g| g.as_ref().map(|s| !s.is_closed()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Start the periodic refresh timer. Ticks funnel through the same
    /// coalesced path as push signals. Restarting replaces the previous
    /// timer.
    pub fn start_auto_refresh(&self, store_id: &str, interval: Duration) {
        let token = self.cancel.child_token();
        let refresh_tx = self.refresh_tx.clone();
        let store_id = store_id.to_string();
        let tick_token = token.clone();

        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately; the
            // initial load is the caller's job, so skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = tick_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match refresh_tx.try_send(RefreshRequest {
                            store_id: store_id.clone(),
                            trigger: RefreshTrigger::Timer,
                        }) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!("refresh already pending; timer tick coalesced");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            debug!("auto-refresh timer stopped");
        });

        if let Ok(mut guard) = self.auto_refresh.lock() {
            if let Some(previous) = guard.replace(token) {
                previous.cancel();
            }
        }
        info!(interval_secs = interval.as_secs_f64(), "auto-refresh started");
    }

    /// Stop the periodic refresh timer. Idempotent; an in-flight load
    /// still completes and applies its result.
    pub fn stop_auto_refresh(&self) {
        if let Ok(mut guard) = self.auto_refresh.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
                info!("auto-refresh stopped");
            }
        }
    }

    /// Current board snapshot.
    pub fn snapshot(&self) -> OrderSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch channel the presentation layer observes for new snapshots.
    pub fn snapshots(&self) -> watch::Receiver<OrderSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop all producers and drain the consumer task.
    pub async fn shutdown(&self) {
        self.stop_realtime();
        self.stop_auto_refresh();
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("sync controller shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
