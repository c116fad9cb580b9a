//! Order lifecycle state machine.
//!
//! Maps each preparation status to its canonical next status (the single
//! "advance" action the board binds to the primary button) and to the
//! action label shown for that stage. Staff corrections that jump to an
//! arbitrary status bypass this module entirely and go through
//! `SyncController::override_status`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::OrderType;

/// Preparation lifecycle status of an order.
///
/// The lifecycle is linear: `received → acknowledged → preparing → ready →
/// pickedUp → completed`. `completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Received,
    Acknowledged,
    Preparing,
    Ready,
    PickedUp,
    Completed,
}

impl OrderStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Received,
        OrderStatus::Acknowledged,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::PickedUp,
        OrderStatus::Completed,
    ];

    /// The canonical next status for the "advance" action.
    ///
    /// Total over all non-terminal statuses; `None` only for `completed`.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Received => Some(OrderStatus::Acknowledged),
            OrderStatus::Acknowledged => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::PickedUp),
            OrderStatus::PickedUp => Some(OrderStatus::Completed),
            OrderStatus::Completed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == OrderStatus::Completed
    }

    /// Label for the primary action that advances an order out of this
    /// status. Leaving `ready` reads differently per order type.
    /// Metadata only; never performs a transition.
    pub fn action_label(self, order_type: OrderType) -> Option<&'static str> {
        match self {
            OrderStatus::Received => Some("Acknowledge"),
            OrderStatus::Acknowledged => Some("Start preparing"),
            OrderStatus::Preparing => Some("Mark ready"),
            OrderStatus::Ready => Some(match order_type {
                OrderType::Pickup => "Hand to customer",
                OrderType::Delivery => "Hand to driver",
                OrderType::DineIn => "Send to table",
            }),
            OrderStatus::PickedUp => Some("Complete order"),
            OrderStatus::Completed => None,
        }
    }

    /// Wire/display form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Received => "received",
            OrderStatus::Acknowledged => "acknowledged",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::PickedUp => "pickedUp",
            OrderStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_total_over_non_terminal_statuses() {
        for status in OrderStatus::ALL {
            if status.is_terminal() {
                assert_eq!(status.next(), None);
            } else {
                assert!(status.next().is_some(), "{status} must advance");
            }
        }
    }

    #[test]
    fn test_advancing_from_received_reaches_completed_in_five_steps() {
        let mut seen = vec![OrderStatus::Received];
        let mut current = OrderStatus::Received;
        let mut steps = 0;
        while let Some(next) = current.next() {
            assert!(!seen.contains(&next), "lifecycle must not repeat {next}");
            seen.push(next);
            current = next;
            steps += 1;
        }
        assert_eq!(steps, 5);
        assert_eq!(current, OrderStatus::Completed);
    }

    #[test]
    fn test_ready_label_depends_on_order_type() {
        let pickup = OrderStatus::Ready.action_label(OrderType::Pickup);
        let delivery = OrderStatus::Ready.action_label(OrderType::Delivery);
        let dine_in = OrderStatus::Ready.action_label(OrderType::DineIn);
        assert_ne!(pickup, delivery);
        assert_ne!(delivery, dine_in);
        assert_ne!(pickup, dine_in);
    }

    #[test]
    fn test_completed_has_no_action_label() {
        assert_eq!(OrderStatus::Completed.action_label(OrderType::Pickup), None);
    }

    #[test]
    fn test_serde_uses_camel_case_wire_form() {
        let json = serde_json::to_string(&OrderStatus::PickedUp).unwrap();
        assert_eq!(json, "\"pickedUp\"");
        let parsed: OrderStatus = serde_json::from_str("\"received\"").unwrap();
        assert_eq!(parsed, OrderStatus::Received);
    }

    #[test]
    fn test_display_matches_wire_form() {
        for status in OrderStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
