//! Order data model and board views.
//!
//! Wire-facing order records (camelCase JSON with aliases for the admin
//! dashboard's older field names), derived timing helpers, and the
//! `OrderSnapshot` read model the presentation layer consumes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::OrderStatus;

// ---------------------------------------------------------------------------
// Order records
// ---------------------------------------------------------------------------

/// How the order leaves the kitchen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderType {
    Pickup,
    Delivery,
    DineIn,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Pickup => "pickup",
            OrderType::Delivery => "delivery",
            OrderType::DineIn => "dineIn",
        }
    }
}

/// A single line item on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub customizations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One customer order as seen by the kitchen.
///
/// `id` is opaque and immutable for the record's lifetime. Wait-time values
/// are derived on demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub customer_name: String,
    #[serde(rename = "type", alias = "orderType")]
    pub order_type: OrderType,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    #[serde(alias = "createdAt")]
    pub placed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
    /// Estimated preparation time in minutes.
    #[serde(alias = "estimatedTime")]
    pub estimated_prep_time: i64,
}

impl Order {
    /// Whole minutes this order has been waiting, clamped at zero so a
    /// marginally skewed clock never reports a negative wait.
    pub fn minutes_waiting(&self, now: DateTime<Utc>) -> i64 {
        (now - self.placed_at).num_minutes().max(0)
    }

    pub fn estimated_ready_time(&self) -> DateTime<Utc> {
        self.placed_at + Duration::minutes(self.estimated_prep_time)
    }

    /// Structural validation applied after decode. A batch containing any
    /// invalid record is rejected wholesale; no partial orders ever reach
    /// the board.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err(format!("order {} has an empty id", self.order_number));
        }
        if self.order_number.trim().is_empty() {
            return Err(format!("order {} has an empty order number", self.id));
        }
        if self.estimated_prep_time < 0 {
            return Err(format!(
                "order {} has a negative estimated prep time",
                self.order_number
            ));
        }
        for item in &self.items {
            if item.quantity < 1 {
                return Err(format!(
                    "order {}: item '{}' has zero quantity",
                    self.order_number, item.name
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Board snapshot
// ---------------------------------------------------------------------------

/// Where the orders in a snapshot came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotSource {
    /// No load has produced data yet.
    #[default]
    NotLoaded,
    /// Data from a successful remote fetch.
    Remote,
    /// First-load fallback data; replaced by the next successful fetch.
    Fallback,
}

/// Immutable view of the active order set plus sync health, published to
/// the presentation layer after every merge.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    pub orders: Vec<Order>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub source: SnapshotSource,
    /// Fetch failures since the last successful load.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl OrderSnapshot {
    /// Orders in one status column, oldest first.
    pub fn with_status(&self, status: OrderStatus) -> Vec<&Order> {
        let mut rows: Vec<&Order> = self.orders.iter().filter(|o| o.status == status).collect();
        rows.sort_by_key(|o| o.placed_at);
        rows
    }

    /// Orders of one type, oldest first.
    pub fn of_type(&self, order_type: OrderType) -> Vec<&Order> {
        let mut rows: Vec<&Order> = self
            .orders
            .iter()
            .filter(|o| o.order_type == order_type)
            .collect();
        rows.sort_by_key(|o| o.placed_at);
        rows
    }

    /// Per-status counts in lifecycle order, for the board header strip.
    pub fn status_counts(&self) -> Vec<(OrderStatus, usize)> {
        OrderStatus::ALL
            .iter()
            .map(|s| (*s, self.orders.iter().filter(|o| o.status == *s).count()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Sample data
// ---------------------------------------------------------------------------

/// A small plausible order set, usable as the first-load fallback when the
/// remote store is unreachable on a cold start.
pub fn sample_orders(now: DateTime<Utc>) -> Vec<Order> {
    vec![
        Order {
            id: Uuid::new_v4().to_string(),
            order_number: "DEMO-001".to_string(),
            customer_name: "Alex".to_string(),
            order_type: OrderType::Pickup,
            items: vec![OrderItem {
                name: "Souvlaki wrap".to_string(),
                quantity: 2,
                customizations: vec!["no onions".to_string()],
                notes: None,
            }],
            status: OrderStatus::Received,
            placed_at: now - Duration::minutes(2),
            special_instructions: None,
            estimated_prep_time: 10,
        },
        Order {
            id: Uuid::new_v4().to_string(),
            order_number: "DEMO-002".to_string(),
            customer_name: "Maria".to_string(),
            order_type: OrderType::Delivery,
            items: vec![
                OrderItem {
                    name: "Margherita".to_string(),
                    quantity: 1,
                    customizations: vec![],
                    notes: Some("extra crispy".to_string()),
                },
                OrderItem {
                    name: "Greek salad".to_string(),
                    quantity: 1,
                    customizations: vec!["dressing on the side".to_string()],
                    notes: None,
                },
            ],
            status: OrderStatus::Preparing,
            placed_at: now - Duration::minutes(12),
            special_instructions: Some("Ring the bell twice".to_string()),
            estimated_prep_time: 25,
        },
        Order {
            id: Uuid::new_v4().to_string(),
            order_number: "DEMO-003".to_string(),
            customer_name: "Kostas".to_string(),
            order_type: OrderType::DineIn,
            items: vec![OrderItem {
                name: "Moussaka".to_string(),
                quantity: 1,
                customizations: vec![],
                notes: None,
            }],
            status: OrderStatus::Ready,
            placed_at: now - Duration::minutes(24),
            special_instructions: None,
            estimated_prep_time: 20,
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
