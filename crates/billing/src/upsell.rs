//! One-click upsell charges
//!
//! An upsell reuses the card saved by the buyer's original checkout. The
//! issuer only creates the payment intent; the browser confirms it (3-D
//! Secure included) and the purchase side effects run when the
//! `payment_intent.succeeded` webhook arrives.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::gateway::ProviderGateway;
use crate::idempotency::IdempotencyKey;
use crate::types::{CheckoutSession, NewPaymentIntent, UPSELL_MARKER_KEY};

/// Handle the client uses to confirm the upsell charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsellAuthorization {
    pub client_secret: String,
    #[serde(rename = "pm_id")]
    pub payment_method_id: String,
    #[serde(skip)]
    pub payment_intent_id: String,
}

/// Issues upsell payment intents against a previous checkout's saved card
#[derive(Clone)]
pub struct UpsellIssuer {
    gateway: Arc<dyn ProviderGateway>,
}

impl UpsellIssuer {
    pub fn new(gateway: Arc<dyn ProviderGateway>) -> Self {
        Self { gateway }
    }

    /// Authorize an upsell of `quantity` units of `price_id` for the buyer of
    /// `session_id`.
    ///
    /// Repeating the call with the same arguments returns the same payment
    /// intent instead of creating a second charge.
    pub async fn authorize(
        &self,
        session_id: &str,
        price_id: &str,
        quantity: u64,
    ) -> BillingResult<UpsellAuthorization> {
        let session_id = session_id.trim();
        let price_id = price_id.trim();
        if session_id.is_empty() || price_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "session_id and price_id are required".to_string(),
            ));
        }
        if quantity == 0 {
            return Err(BillingError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }

        let session = self.gateway.retrieve_checkout_session(session_id).await?;
        let customer_id = session
            .customer_id
            .clone()
            .ok_or_else(|| BillingError::SessionWithoutCustomer(session_id.to_string()))?;
        let payment_method_id = self.saved_payment_method(&session, &customer_id).await?;

        let price = self.gateway.retrieve_price(price_id).await?;
        let unit_amount = price.unit_amount.ok_or_else(|| {
            BillingError::InvalidAmount(format!("Price {} has no unit amount", price_id))
        })?;
        let amount = i64::try_from(quantity)
            .ok()
            .and_then(|qty| unit_amount.checked_mul(qty))
            .ok_or_else(|| {
                BillingError::InvalidAmount(format!(
                    "{} x {} overflows the charge amount",
                    unit_amount, quantity
                ))
            })?;

        let mut metadata = session.metadata.clone();
        metadata.insert(UPSELL_MARKER_KEY.to_string(), "true".to_string());
        metadata.insert("parent_session".to_string(), session_id.to_string());
        metadata.insert("price_id".to_string(), price_id.to_string());
        metadata.insert("quantity".to_string(), quantity.to_string());

        let intent = self
            .gateway
            .create_payment_intent(
                &NewPaymentIntent {
                    amount,
                    currency: price.currency.to_lowercase(),
                    customer_id: customer_id.clone(),
                    payment_method_id: payment_method_id.clone(),
                    metadata,
                },
                &IdempotencyKey::upsell(session_id, price_id, quantity),
            )
            .await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            BillingError::StripeApi(format!("Payment intent {} has no client secret", intent.id))
        })?;

        tracing::info!(
            session_id = %session_id,
            price_id = %price_id,
            quantity = quantity,
            amount = amount,
            payment_intent_id = %intent.id,
            "Upsell payment intent authorized"
        );

        Ok(UpsellAuthorization {
            client_secret,
            payment_method_id,
            payment_intent_id: intent.id,
        })
    }

    /// The card used on the session, else the customer's default card
    async fn saved_payment_method(
        &self,
        session: &CheckoutSession,
        customer_id: &str,
    ) -> BillingResult<String> {
        if let Some(pm) = session.payment_method_id.as_deref().filter(|pm| !pm.is_empty()) {
            return Ok(pm.to_string());
        }

        let customer = self.gateway.retrieve_customer(customer_id).await?;
        customer
            .default_payment_method
            .filter(|pm| !pm.is_empty())
            .ok_or_else(|| {
                tracing::info!(
                    session_id = %session.id,
                    customer_id = %customer_id,
                    "No saved payment method for upsell"
                );
                BillingError::NoSavedPaymentMethod
            })
    }
}
