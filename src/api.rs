//! Admin dashboard order API client.
//!
//! HTTP implementation of the `OrderStore` interface: authenticated order
//! fetches, status updates, a long-poll change-signal subscription, and a
//! lightweight connectivity probe.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::Order;
use crate::status::OrderStatus;
use crate::store::{OrderStore, SignalFn, StoreError, Subscription};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Auth header checked by the admin dashboard for kitchen terminals.
const API_KEY_HEADER: &str = "X-Kitchen-API-Key";

/// Pause between change-signal polls after a successful round.
const SIGNAL_POLL_PAUSE: Duration = Duration::from_millis(250);

/// Pause between change-signal polls after a failed round.
const SIGNAL_FAILURE_PAUSE: Duration = Duration::from_secs(2);

/// Consecutive signal-poll failures after which the subscription closes.
/// The auto-refresh timer carries liveness from there.
const MAX_SIGNAL_FAILURES: u32 = 5;

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the order store base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a typed store error with a user-friendly
/// message.
fn friendly_error(url: &str, err: &reqwest::Error) -> StoreError {
    if err.is_connect() {
        return StoreError::Unreachable(format!("cannot reach order store at {url}"));
    }
    if err.is_timeout() {
        return StoreError::Timeout(format!("connection to {url} timed out"));
    }
    if err.is_builder() {
        return StoreError::Client(format!("invalid order store URL: {url}"));
    }
    StoreError::Client(format!("network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "terminal not authorised for this store".to_string(),
        404 => "order store endpoint not found".to_string(),
        s if s >= 500 => format!("order store server error (HTTP {s})"),
        s => format!("unexpected response from order store (HTTP {s})"),
    }
}

/// Build a `Rejected` error, preserving validation details from the
/// response body when the dashboard sends structured errors.
fn rejection_from_body(status: StatusCode, body_text: &str) -> StoreError {
    let detail = if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status_error(status));
        format!("{message} (HTTP {})", status.as_u16())
    } else if !body_text.trim().is_empty() {
        format!(
            "{} (HTTP {}): {}",
            status_error(status),
            status.as_u16(),
            body_text.trim()
        )
    } else {
        format!("{} (HTTP {})", status_error(status), status.as_u16())
    };
    StoreError::Rejected(detail)
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

/// Decode a fetched order batch. Accepts either a bare array or an object
/// wrapping it under `orders`/`data`. Fails closed: any malformed record
/// rejects the entire batch.
fn decode_order_batch(body: &str) -> Result<Vec<Order>, StoreError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("response is not valid JSON: {e}")))?;

    let raw = match value {
        Value::Array(_) => value,
        Value::Object(ref obj) => obj
            .get("orders")
            .or_else(|| obj.get("data"))
            .cloned()
            .ok_or_else(|| StoreError::Decode("response carries no orders array".to_string()))?,
        _ => {
            return Err(StoreError::Decode(
                "response is neither an array nor an object".to_string(),
            ))
        }
    };

    let orders: Vec<Order> = serde_json::from_value(raw)
        .map_err(|e| StoreError::Decode(format!("malformed order record: {e}")))?;
    for order in &orders {
        order.validate().map_err(StoreError::Decode)?;
    }
    Ok(orders)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalResponse {
    #[serde(default)]
    changed: bool,
    #[serde(default)]
    cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(Debug, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP order store
// ---------------------------------------------------------------------------

/// `OrderStore` backed by the admin dashboard REST API.
pub struct HttpOrderStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpOrderStore {
    pub fn new(store_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Client(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_store_url(store_url),
            api_key: api_key.trim().to_string(),
        })
    }

    /// Test connectivity to the order store with a lightweight health-check.
    pub async fn test_connectivity(&self) -> ConnectivityResult {
        let health_url = format!("{}/api/health", self.base_url);

        let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(format!("failed to create HTTP client: {e}")),
                };
            }
        };

        let start = Instant::now();
        let resp = match client
            .get(&health_url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(friendly_error(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() {
            info!(latency_ms = latency, "order store connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_error(status)),
            }
        }
    }
}

#[async_trait::async_trait]
impl OrderStore for HttpOrderStore {
    async fn fetch_orders(&self, store_id: &str) -> Result<Vec<Order>, StoreError> {
        let url = format!("{}/api/kitchen/orders", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("storeId", store_id)])
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(rejection_from_body(status, &body_text));
        }

        let orders = decode_order_batch(&body_text)?;
        debug!(store_id, orders = orders.len(), "fetched active orders");
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/api/kitchen/orders/{}/status",
            self.base_url,
            percent_encode(order_id)
        );
        let resp = self
            .client
            .patch(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "status": new_status }))
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(order_id.to_string()));
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(rejection_from_body(status, &body_text));
        }
        debug!(order_id, status = %new_status, "order status written to remote store");
        Ok(())
    }

    fn subscribe_to_orders(&self, store_id: &str, on_signal: SignalFn) -> Subscription {
        let cancel = CancellationToken::new();
        let (closed_tx, closed_rx) = watch::channel(false);

        let client = self.client.clone();
        let url = format!("{}/api/kitchen/orders/signal", self.base_url);
        let api_key = self.api_key.clone();
        let store_id = store_id.to_string();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut cursor: Option<String> = None;
            let mut failures: u32 = 0;

            loop {
                let mut request = client
                    .get(&url)
                    .header(API_KEY_HEADER, &api_key)
                    .query(&[("storeId", store_id.as_str())]);
                if let Some(ref c) = cursor {
                    request = request.query(&[("cursor", c.as_str())]);
                }

                let poll = tokio::select! {
                    _ = token.cancelled() => break,
                    result = request.send() => result,
                };

                match poll {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<SignalResponse>().await {
                            Ok(signal) => {
                                failures = 0;
                                if signal.cursor.is_some() {
                                    cursor = signal.cursor;
                                }
                                if signal.changed {
                                    debug!(store_id, "order change signal received");
                                    on_signal();
                                }
                            }
                            Err(e) => {
                                failures += 1;
                                warn!(store_id, error = %e, "order change signal decode failed");
                            }
                        }
                    }
                    Ok(resp) => {
                        failures += 1;
                        warn!(store_id, status = %resp.status(), "order change signal poll rejected");
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(store_id, error = %e, "order change signal poll failed");
                    }
                }

                if failures >= MAX_SIGNAL_FAILURES {
                    warn!(
                        store_id,
                        failures, "closing order subscription after repeated poll failures"
                    );
                    break;
                }

                let pause = if failures > 0 {
                    SIGNAL_FAILURE_PAUSE
                } else {
                    SIGNAL_POLL_PAUSE
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            let _ = closed_tx.send(true);
            debug!(store_id, "order subscription loop stopped");
        });

        Subscription::new(cancel, closed_rx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_store_url_adds_scheme_and_strips_api() {
        assert_eq!(
            normalize_store_url("admin.example.com/api/"),
            "https://admin.example.com"
        );
        assert_eq!(
            normalize_store_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_store_url("https://admin.example.com///"),
            "https://admin.example.com"
        );
    }

    #[test]
    fn test_percent_encode_preserves_unreserved_bytes() {
        assert_eq!(percent_encode("order-1_a.b~"), "order-1_a.b~");
        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_decode_order_batch_accepts_bare_array_and_wrapper() {
        let record = r#"{
            "id": "o-1",
            "orderNumber": "ORD-1",
            "customerName": "Eleni",
            "type": "pickup",
            "items": [{"name": "Freddo espresso", "quantity": 1}],
            "status": "received",
            "placedAt": "2026-08-07T10:00:00Z",
            "estimatedPrepTime": 5
        }"#;
        let bare = format!("[{record}]");
        let wrapped = format!("{{\"orders\": [{record}]}}");
        assert_eq!(decode_order_batch(&bare).unwrap().len(), 1);
        assert_eq!(decode_order_batch(&wrapped).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_order_batch_fails_closed_on_one_bad_record() {
        let good = r#"{
            "id": "o-1",
            "orderNumber": "ORD-1",
            "customerName": "Eleni",
            "type": "pickup",
            "items": [{"name": "Freddo espresso", "quantity": 1}],
            "status": "received",
            "placedAt": "2026-08-07T10:00:00Z",
            "estimatedPrepTime": 5
        }"#;
        let bad_status = r#"{
            "id": "o-2",
            "orderNumber": "ORD-2",
            "customerName": "Nikos",
            "type": "delivery",
            "items": [{"name": "Toast", "quantity": 1}],
            "status": "fried",
            "placedAt": "2026-08-07T10:00:00Z",
            "estimatedPrepTime": 5
        }"#;
        let batch = format!("[{good}, {bad_status}]");
        assert!(matches!(
            decode_order_batch(&batch),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_order_batch_fails_closed_on_zero_quantity() {
        let zero_qty = r#"[{
            "id": "o-3",
            "orderNumber": "ORD-3",
            "customerName": "Anna",
            "type": "dineIn",
            "items": [{"name": "Lemonade", "quantity": 0}],
            "status": "received",
            "placedAt": "2026-08-07T10:00:00Z",
            "estimatedPrepTime": 5
        }]"#;
        assert!(matches!(
            decode_order_batch(zero_qty),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_order_batch_rejects_non_json() {
        assert!(matches!(
            decode_order_batch("<html>gateway error</html>"),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_rejection_preserves_dashboard_error_message() {
        let err = rejection_from_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error": "unknown store"}"#,
        );
        assert!(err.to_string().contains("unknown store"));
        assert!(err.to_string().contains("422"));
    }

    #[test]
    fn test_status_error_maps_common_codes() {
        assert!(status_error(StatusCode::UNAUTHORIZED).contains("API key"));
        assert!(status_error(StatusCode::BAD_GATEWAY).contains("server error"));
    }
}
