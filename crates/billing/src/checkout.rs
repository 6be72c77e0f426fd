//! Stripe Checkout sessions
//!
//! Opens the hosted checkout page for a first purchase and announces it to
//! the attribution and order-tracking platforms.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attribution::{ConversionDispatcher, ConversionEvent};
use crate::commission::Commission;
use crate::error::{BillingError, BillingResult};
use crate::gateway::ProviderGateway;
use crate::orders::{OrderCustomer, OrderProduct, OrderReport, OrderReporter, OrderStatus};
use crate::types::{deserialize_quantity, NewCheckoutSession, UtmTags};

/// Placeholder Stripe replaces with the session id on redirect
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Redirect targets for the hosted checkout page
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Where buyers land after paying
    pub success_url: String,
    /// Landing page for prices that lead into the upsell offer
    pub upsell_success_url: String,
    /// Prices whose buyers are sent to the upsell page
    pub upsell_entry_price_ids: Vec<String>,
    pub cancel_url: String,
}

impl CheckoutConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let success_url = std::env::var("CHECKOUT_SUCCESS_URL")
            .map_err(|_| BillingError::Config("CHECKOUT_SUCCESS_URL not set".to_string()))?;
        Ok(Self {
            upsell_success_url: std::env::var("UPSELL_SUCCESS_URL")
                .unwrap_or_else(|_| success_url.clone()),
            upsell_entry_price_ids: std::env::var("UPSELL_ENTRY_PRICE_IDS")
                .map(|ids| {
                    ids.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                .map_err(|_| BillingError::Config("CHECKOUT_CANCEL_URL not set".to_string()))?,
            success_url,
        })
    }

    /// Success URL for a price, carrying the session id placeholder
    pub fn success_url_for(&self, price_id: &str) -> String {
        let base = if self.upsell_entry_price_ids.iter().any(|id| id == price_id) {
            &self.upsell_success_url
        } else {
            &self.success_url
        };
        with_session_id(base)
    }
}

fn with_session_id(url: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}sid={}", url, separator, SESSION_ID_PLACEHOLDER)
}

fn default_quantity() -> u64 {
    1
}

/// Body of a checkout request from the landing page
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub price_id: String,
    #[serde(default = "default_quantity", deserialize_with = "deserialize_quantity")]
    pub quantity: u64,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(flatten)]
    pub utm: UtmTags,
}

/// Request details forwarded to the attribution platform
#[derive(Debug, Clone, Default)]
pub struct CheckoutContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: Option<String>,
    /// Doubles as the pixel event id on the landing page
    pub session_id: String,
}

/// Checkout service for creating Stripe checkout sessions
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn ProviderGateway>,
    attribution: Arc<dyn ConversionDispatcher>,
    orders: Arc<dyn OrderReporter>,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        attribution: Arc<dyn ConversionDispatcher>,
        orders: Arc<dyn OrderReporter>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            gateway,
            attribution,
            orders,
            config,
        }
    }

    /// Create a one-off payment session that saves the card for later upsells
    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
        context: &CheckoutContext,
    ) -> BillingResult<CheckoutResponse> {
        let price_id = request.price_id.trim();
        if price_id.is_empty() {
            return Err(BillingError::InvalidInput("price_id is required".to_string()));
        }
        if request.quantity == 0 {
            return Err(BillingError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }

        let session = self
            .gateway
            .create_checkout_session(&NewCheckoutSession {
                price_id: price_id.to_string(),
                quantity: request.quantity,
                customer_email: request
                    .customer_email
                    .as_deref()
                    .map(str::trim)
                    .filter(|email| !email.is_empty())
                    .map(String::from),
                success_url: self.config.success_url_for(price_id),
                cancel_url: self.config.cancel_url.clone(),
                utm: request.utm.clone(),
            })
            .await?;

        tracing::info!(
            session_id = %session.id,
            price_id = %price_id,
            quantity = request.quantity,
            "Checkout session created"
        );

        let currency = session.currency.clone().unwrap_or_default();
        let total = session.amount_total.unwrap_or(0);

        let event = ConversionEvent::initiate_checkout(
            &session.id,
            &currency,
            total,
            session.price_ids(),
        )
        .with_client(context.client_ip.clone(), context.user_agent.clone())
        .with_source_url(context.source_url.clone());
        self.attribution.dispatch(&event).await;

        // Commission is only known once the payment is captured
        let order = OrderReport::new(
            &session.id,
            OrderStatus::WaitingPayment,
            chrono::Utc::now().timestamp(),
            OrderCustomer::from(&session.customer_details),
            session.line_items.iter().map(OrderProduct::from).collect(),
            session.utm_tags(),
            Commission {
                total_price_in_cents: total,
                gateway_fee_in_cents: 0,
                user_commission_in_cents: 0,
            },
            &currency,
        );
        self.orders.report(&order).await;

        Ok(CheckoutResponse {
            checkout_url: session.url,
            session_id: session.id,
        })
    }
}
