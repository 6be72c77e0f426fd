//! Order reports for the order-tracking platform (UTMify)
//!
//! Same fire-and-forget contract as conversion events: failures are logged
//! and reported as `false`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commission::Commission;
use crate::types::{CustomerDetails, LineItem, UtmTags};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Upper bound for one order report request
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Order tracking configuration
#[derive(Debug, Clone)]
pub struct OrderTrackingConfig {
    /// Orders endpoint
    pub api_url: String,
    /// Value of the `x-api-token` header
    pub api_key: String,
}

impl OrderTrackingConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("UTMIFY_API_URL").unwrap_or_default(),
            api_key: std::env::var("UTMIFY_API_KEY").unwrap_or_default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    WaitingPayment,
    Paid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub document: Option<String>,
}

impl From<&CustomerDetails> for OrderCustomer {
    fn from(details: &CustomerDetails) -> Self {
        Self {
            name: details.name.clone().unwrap_or_default(),
            email: details.email.clone().unwrap_or_default(),
            phone: details.phone.clone(),
            document: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderProduct {
    pub id: String,
    pub name: String,
    pub plan_id: String,
    pub plan_name: Option<String>,
    pub quantity: u64,
    pub price_in_cents: i64,
}

impl From<&LineItem> for OrderProduct {
    /// Checkout line items are reported per price, at their subtotal
    fn from(item: &LineItem) -> Self {
        Self {
            id: item.price_id.clone(),
            name: item
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| item.price_id.clone()),
            plan_id: item.price_id.clone(),
            plan_name: item.price_nickname.clone(),
            quantity: item.quantity,
            price_in_cents: item.amount_subtotal.unwrap_or_else(|| item.billed_amount()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderCommission {
    #[serde(flatten)]
    pub amounts: Commission,
    /// Upper-case ISO code
    pub currency: String,
}

/// Snapshot of an order as sent to the tracking platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReport {
    pub order_id: String,
    pub platform: &'static str,
    pub payment_method: &'static str,
    pub status: OrderStatus,
    pub created_at: String,
    pub approved_date: Option<String>,
    pub refunded_at: Option<String>,
    pub customer: OrderCustomer,
    pub products: Vec<OrderProduct>,
    pub tracking_parameters: UtmTags,
    pub commission: OrderCommission,
}

impl OrderReport {
    /// A card order placed on Stripe.
    ///
    /// Paid orders are stamped with the current time as approval date.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        status: OrderStatus,
        created_at: i64,
        customer: OrderCustomer,
        products: Vec<OrderProduct>,
        tracking_parameters: UtmTags,
        commission: Commission,
        currency: &str,
    ) -> Self {
        let approved_date = match status {
            OrderStatus::Paid => Some(format_timestamp(Utc::now().timestamp())),
            OrderStatus::WaitingPayment => None,
        };
        Self {
            order_id: order_id.into(),
            platform: "Stripe",
            payment_method: "credit_card",
            status,
            created_at: format_timestamp(created_at),
            approved_date,
            refunded_at: None,
            customer,
            products,
            tracking_parameters,
            commission: OrderCommission {
                amounts: commission,
                currency: currency.to_uppercase(),
            },
        }
    }
}

/// Format unix seconds as `YYYY-MM-DD HH:MM:SS` in UTC
pub fn format_timestamp(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Sink for order reports
#[async_trait]
pub trait OrderReporter: Send + Sync {
    /// Send one report. Returns `true` when the platform accepted it.
    async fn report(&self, order: &OrderReport) -> bool;
}

/// UTMify orders API client
#[derive(Clone)]
pub struct UtmifyClient {
    config: OrderTrackingConfig,
    client: reqwest::Client,
}

impl UtmifyClient {
    pub fn new(config: OrderTrackingConfig) -> Self {
        Self::with_timeout(config, SINK_TIMEOUT)
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(config: OrderTrackingConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(OrderTrackingConfig::from_env())
    }
}

#[async_trait]
impl OrderReporter for UtmifyClient {
    async fn report(&self, order: &OrderReport) -> bool {
        if !self.config.is_enabled() {
            tracing::warn!(order_id = %order.order_id, "Order tracking not configured, skipping");
            return false;
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-token", &self.config.api_key)
            .json(order)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(
                    order_id = %order.order_id,
                    status = ?order.status,
                    "Order report sent"
                );
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    order_id = %order.order_id,
                    status = %status,
                    body = %body,
                    "Order report rejected - non-fatal"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.order_id,
                    error = %e,
                    "Failed to send order report - non-fatal"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommissionRate;
    use mockito::Matcher;

    fn paid_report() -> OrderReport {
        OrderReport::new(
            "cs_1",
            OrderStatus::Paid,
            1_700_000_000,
            OrderCustomer {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                phone: None,
                document: None,
            },
            vec![OrderProduct {
                id: "p_1".to_string(),
                name: "Formula".to_string(),
                plan_id: "p_1".to_string(),
                plan_name: None,
                quantity: 2,
                price_in_cents: 5000,
            }],
            UtmTags {
                utm_source: "fb".to_string(),
                ..Default::default()
            },
            CommissionRate::default().split(5000),
            "usd",
        )
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn test_report_wire_shape() {
        let json = serde_json::to_value(paid_report()).unwrap();

        assert_eq!(json["orderId"], "cs_1");
        assert_eq!(json["platform"], "Stripe");
        assert_eq!(json["paymentMethod"], "credit_card");
        assert_eq!(json["status"], "paid");
        assert_eq!(json["createdAt"], "2023-11-14 22:13:20");
        assert!(json["approvedDate"].is_string());
        assert!(json["refundedAt"].is_null());
        assert!(json["customer"]["document"].is_null());
        assert_eq!(json["products"][0]["planId"], "p_1");
        assert_eq!(json["products"][0]["priceInCents"], 5000);
        assert_eq!(json["trackingParameters"]["utm_source"], "fb");
        assert_eq!(json["trackingParameters"]["utm_term"], "");
        assert_eq!(json["commission"]["gatewayFeeInCents"], 337);
        assert_eq!(json["commission"]["currency"], "USD");
    }

    #[test]
    fn test_waiting_payment_has_no_approval_date() {
        let report = OrderReport::new(
            "cs_2",
            OrderStatus::WaitingPayment,
            0,
            OrderCustomer::default(),
            Vec::new(),
            UtmTags::default(),
            CommissionRate::default().split(0),
            "usd",
        );
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["status"], "waiting_payment");
        assert!(json["approvedDate"].is_null());
    }

    #[tokio::test]
    async fn test_report_sends_api_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .match_header("x-api-token", "key_1")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "orderId": "cs_1",
                "status": "paid"
            })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let client = UtmifyClient::new(OrderTrackingConfig {
            api_url: format!("{}/orders", server.url()),
            api_key: "key_1".to_string(),
        });

        assert!(client.report(&paid_report()).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_report_failure_is_reported_not_raised() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/orders")
            .with_status(422)
            .with_body(r#"{"message":"invalid"}"#)
            .create_async()
            .await;

        let client = UtmifyClient::new(OrderTrackingConfig {
            api_url: format!("{}/orders", server.url()),
            api_key: "key_1".to_string(),
        });

        assert!(!client.report(&paid_report()).await);
    }

    #[tokio::test]
    async fn test_report_gives_up_on_unresponsive_endpoint() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = UtmifyClient::with_timeout(
            OrderTrackingConfig {
                api_url: format!("http://{}/orders", addr),
                api_key: "key_1".to_string(),
            },
            Duration::from_millis(100),
        );

        let sent = tokio::time::timeout(Duration::from_secs(5), client.report(&paid_report()))
            .await
            .expect("report should time out on its own");
        assert!(!sent);
    }
}
