//! Alert dispatch for newly observed, urgent, and ready orders.
//!
//! The dispatcher turns merge deltas into at-most-once fire-and-forget
//! signals on a narrow sink interface. Sound, haptics, and speech live
//! behind that interface; nothing here knows or cares how a chime is made.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::model::Order;

/// Default wait-time boundary past which an order is flagged urgent.
pub const DEFAULT_URGENT_THRESHOLD_MINUTES: i64 = 20;

/// One-way outlet for alert signals. No return values, no failure
/// propagation; implementations swallow their own errors.
pub trait AlertSink: Send + Sync {
    fn raise_new_order(&self, order_number: &str);
    fn raise_urgent(&self, order_number: &str);
    fn raise_ready(&self, order_number: &str);
}

/// Sink that narrates alerts into the log stream. Useful as the default
/// wiring and in headless deployments.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise_new_order(&self, order_number: &str) {
        info!(order_number, "new order chime");
    }

    fn raise_urgent(&self, order_number: &str) {
        info!(order_number, "urgent order chime");
    }

    fn raise_ready(&self, order_number: &str) {
        info!(order_number, "order ready chime");
    }
}

/// Decides which alerts to raise for one merge result.
///
/// Holds exactly one piece of state: whether a first snapshot has been
/// produced. The first snapshot is the historical backlog present at
/// startup and never alerts.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    urgent_threshold_minutes: i64,
    first_snapshot_done: bool,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, urgent_threshold_minutes: i64) -> Self {
        Self {
            sink,
            urgent_threshold_minutes,
            first_snapshot_done: false,
        }
    }

    /// Raise alerts for one merge.
    ///
    /// `new_orders` is the delta of newly observed orders; every one of them
    /// gets a new-order alert, plus an urgent alert when its wait time at
    /// observation exceeds the threshold. `became_ready` holds orders whose
    /// local status changed to ready during the merge.
    pub fn dispatch(
        &mut self,
        new_orders: &[Order],
        became_ready: &[Order],
        observed_at: DateTime<Utc>,
    ) {
        if !self.first_snapshot_done {
            self.first_snapshot_done = true;
            if !new_orders.is_empty() {
                debug!(
                    suppressed = new_orders.len(),
                    "first snapshot; startup backlog does not alert"
                );
            }
            return;
        }

        for order in new_orders {
            self.sink.raise_new_order(&order.order_number);
            if order.minutes_waiting(observed_at) > self.urgent_threshold_minutes {
                self.sink.raise_urgent(&order.order_number);
            }
        }
        for order in became_ready {
            self.sink.raise_ready(&order.order_number);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
