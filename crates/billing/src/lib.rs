// Billing crate clippy configuration
#![allow(clippy::result_large_err)]
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Funnel Billing Module
//!
//! Stripe integration for a single-product sales funnel.
//!
//! ## Features
//!
//! - **Checkout**: Hosted checkout sessions that save the card for later upsells
//! - **Webhooks**: Authenticated, idempotent reconciliation of completed payments
//! - **Invoice Mirror**: One paid bookkeeping invoice per checkout session
//! - **Upsells**: One-click charges against the saved card
//! - **Attribution**: Purchase events for the Meta Conversions API
//! - **Order Tracking**: Order snapshots with commission for UTMify

use std::sync::Arc;

pub mod attribution;
pub mod checkout;
pub mod client;
pub mod commission;
pub mod contact;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod mirror;
pub mod orders;
pub mod types;
pub mod upsell;
pub mod webhooks;

#[cfg(test)]
mod test_support;

// Attribution
pub use attribution::{
    ConversionDispatcher, ConversionEvent, ConversionsApiClient, ConversionsConfig, EventName,
};

// Checkout
pub use checkout::{
    CheckoutConfig, CheckoutContext, CheckoutRequest, CheckoutResponse, CheckoutService,
};

// Client
pub use client::{StripeClient, StripeConfig};

// Commission
pub use commission::{Commission, CommissionRate};

// Contact
pub use contact::{resolve_buyer_contact, BuyerContact, ContactSource};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{ProviderGateway, StripeGateway};

// Idempotency
pub use idempotency::IdempotencyKey;

// Mirror
pub use mirror::{InvoiceMirror, InvoiceMirrorConfig, MirrorOutcome};

// Orders
pub use orders::{OrderReport, OrderReporter, OrderStatus, OrderTrackingConfig, UtmifyClient};

// Upsell
pub use upsell::{UpsellAuthorization, UpsellIssuer};

// Webhooks
pub use webhooks::{
    compute_signature, ReconcileStep, StepFailure, WebhookHandler, WebhookOutcome,
    WebhookVerifier,
};

/// Every setting the billing services need, read once at startup
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub stripe: StripeConfig,
    pub checkout: CheckoutConfig,
    pub invoices: InvoiceMirrorConfig,
    pub conversions: ConversionsConfig,
    pub orders: OrderTrackingConfig,
    pub commission: CommissionRate,
}

impl BillingConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            stripe: StripeConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            invoices: InvoiceMirrorConfig::from_env(),
            conversions: ConversionsConfig::from_env(),
            orders: OrderTrackingConfig::from_env(),
            commission: CommissionRate::from_env()?,
        })
    }
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub upsell: UpsellIssuer,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(BillingConfig::from_env()?))
    }

    /// Create a new billing service talking to Stripe, Meta and UTMify
    pub fn new(config: BillingConfig) -> Self {
        let gateway: Arc<dyn ProviderGateway> =
            Arc::new(StripeGateway::new(StripeClient::new(config.stripe.clone())));
        let attribution: Arc<dyn ConversionDispatcher> =
            Arc::new(ConversionsApiClient::new(config.conversions.clone()));
        let orders: Arc<dyn OrderReporter> = Arc::new(UtmifyClient::new(config.orders.clone()));

        Self::with_collaborators(gateway, attribution, orders, config)
    }

    /// Wire the services around explicit provider and sink implementations
    pub fn with_collaborators(
        gateway: Arc<dyn ProviderGateway>,
        attribution: Arc<dyn ConversionDispatcher>,
        orders: Arc<dyn OrderReporter>,
        config: BillingConfig,
    ) -> Self {
        let mirror = InvoiceMirror::new(gateway.clone(), config.invoices);

        Self {
            checkout: CheckoutService::new(
                gateway.clone(),
                attribution.clone(),
                orders.clone(),
                config.checkout,
            ),
            upsell: UpsellIssuer::new(gateway.clone()),
            webhooks: WebhookHandler::new(
                gateway,
                mirror,
                attribution,
                orders,
                config.commission,
                WebhookVerifier::from_config(&config.stripe),
            ),
        }
    }
}
