//! Remote order store seam.
//!
//! The board never owns durable order state; the remote store is the
//! authority on which orders exist and what status they hold. This module
//! defines the async interface the sync controller consumes, the
//! subscription handle for the push channel, and the error taxonomy shared
//! by all store implementations.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::model::Order;
use crate::status::OrderStatus;

/// No-payload "something changed" callback delivered by the push channel.
/// The receiver must re-fetch to learn what changed.
pub type SignalFn = Arc<dyn Fn() + Send + Sync>;

/// Errors surfaced by a remote order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Remote endpoint could not be reached at all.
    #[error("{0}")]
    Unreachable(String),
    /// The request went out but no response arrived in time.
    #[error("{0}")]
    Timeout(String),
    /// The remote store does not know the referenced order.
    #[error("order {0} not found in the remote store")]
    NotFound(String),
    /// The remote store answered with a non-success status.
    #[error("{0}")]
    Rejected(String),
    /// The response body failed to decode into the order schema. Batches
    /// fail closed: one malformed record rejects the whole response.
    #[error("invalid order payload: {0}")]
    Decode(String),
    /// Client-side failure building or sending the request.
    #[error("{0}")]
    Client(String),
}

/// Remote authority holding order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch the full current active-order set for a store (not a delta).
    async fn fetch_orders(&self, store_id: &str) -> Result<Vec<Order>, StoreError>;

    /// Write a status change to the remote authority.
    async fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<(), StoreError>;

    /// Open the push channel for a store. `on_signal` is invoked once per
    /// delivered change notification; delivery is at-least-once and may be
    /// duplicated or reordered.
    fn subscribe_to_orders(&self, store_id: &str, on_signal: SignalFn) -> Subscription;
}

/// Handle to an open push subscription.
///
/// `cancel` is idempotent. `is_closed` reports whether the underlying
/// channel has died (cancelled or dropped by the store side), so callers
/// can detect lost liveness and lean on the auto-refresh timer.
pub struct Subscription {
    cancel: CancellationToken,
    closed: watch::Receiver<bool>,
}

impl Subscription {
    pub fn new(cancel: CancellationToken, closed: watch::Receiver<bool>) -> Self {
        Self { cancel, closed }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent_and_marks_closed() {
        let (_tx, rx) = watch::channel(false);
        let sub = Subscription::new(CancellationToken::new(), rx);
        assert!(!sub.is_closed());
        sub.cancel();
        sub.cancel();
        assert!(sub.is_closed());
    }

    #[test]
    fn test_store_side_drop_is_detectable() {
        let (tx, rx) = watch::channel(false);
        let sub = Subscription::new(CancellationToken::new(), rx);
        assert!(!sub.is_closed());
        tx.send(true).unwrap();
        assert!(sub.is_closed());
    }
}
