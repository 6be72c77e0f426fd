//! Stripe webhook handling
//!
//! Authenticates deliveries, classifies them and drives the purchase side
//! effects. Only an authentication failure is surfaced to the caller; every
//! other problem is logged and reported through [`WebhookOutcome`] so the
//! endpoint can acknowledge the delivery and let redelivery finish the work.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::attribution::{ConversionDispatcher, ConversionEvent};
use crate::client::StripeConfig;
use crate::commission::CommissionRate;
use crate::contact::resolve_buyer_contact;
use crate::error::{BillingError, BillingResult};
use crate::gateway::ProviderGateway;
use crate::mirror::InvoiceMirror;
use crate::orders::{OrderCustomer, OrderProduct, OrderReport, OrderReporter, OrderStatus};
use crate::types::{CheckoutSession, CustomerUpdate, PaymentIntent, UtmTags};

type HmacSha256 = Hmac<Sha256>;

const UPSELL_FALLBACK_NAME: &str = "Upsell";

/// The parts of a webhook event the reconciler reads
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: WebhookObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObjectRef {
    pub id: String,
}

/// Pipeline step that can fail without failing the delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    LoadSession,
    UpdateCustomer,
    MirrorInvoice,
    LoadPaymentIntent,
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcileStep::LoadSession => "load_session",
            ReconcileStep::UpdateCustomer => "update_customer",
            ReconcileStep::MirrorInvoice => "mirror_invoice",
            ReconcileStep::LoadPaymentIntent => "load_payment_intent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: ReconcileStep,
    pub error: String,
}

/// Result of handling one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Every step succeeded
    Reconciled,
    /// Some steps failed; the rest ran and redelivery can resume
    Degraded { failures: Vec<StepFailure> },
    /// Authenticated but nothing to do for this event
    Ignored,
    /// Signature missing, malformed, stale or wrong
    Unauthenticated,
}

impl WebhookOutcome {
    /// Whether the delivery is acknowledged to the sender
    pub fn acknowledges(&self) -> bool {
        !matches!(self, WebhookOutcome::Unauthenticated)
    }

    fn from_failures(failures: Vec<StepFailure>) -> Self {
        if failures.is_empty() {
            WebhookOutcome::Reconciled
        } else {
            WebhookOutcome::Degraded { failures }
        }
    }
}

/// Stripe-signature verification
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn from_config(config: &StripeConfig) -> Self {
        Self::new(config.webhook_secret.clone(), config.webhook_tolerance_secs)
    }

    /// Verify a `Stripe-Signature` header against the raw body
    pub fn verify(&self, payload: &str, signature: &str) -> BillingResult<()> {
        self.verify_at(payload, signature, chrono::Utc::now().timestamp())
    }

    fn verify_at(&self, payload: &str, signature: &str, now: i64) -> BillingResult<()> {
        // t=timestamp,v1=signature[,v1=signature...][,v0=...]
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        if candidates.is_empty() {
            tracing::warn!("Missing v1 signature in signature header");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        if (now - timestamp).abs() > self.tolerance_secs {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                diff = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());

        let matched = candidates.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });

        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }
        Ok(())
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, as Stripe signs deliveries
pub fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret key".to_string()))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn parse_event(payload: &str) -> BillingResult<WebhookEvent> {
    serde_json::from_str(payload).map_err(|e| BillingError::WebhookPayload(e.to_string()))
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    gateway: Arc<dyn ProviderGateway>,
    mirror: InvoiceMirror,
    attribution: Arc<dyn ConversionDispatcher>,
    orders: Arc<dyn OrderReporter>,
    commission: CommissionRate,
    verifier: WebhookVerifier,
}

impl WebhookHandler {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        mirror: InvoiceMirror,
        attribution: Arc<dyn ConversionDispatcher>,
        orders: Arc<dyn OrderReporter>,
        commission: CommissionRate,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            gateway,
            mirror,
            attribution,
            orders,
            commission,
            verifier,
        }
    }

    /// Verify and parse a Stripe webhook event
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        self.verifier.verify(payload, signature)?;
        parse_event(payload)
    }

    /// Handle one delivery end to end
    pub async fn handle(&self, payload: &str, signature: &str) -> WebhookOutcome {
        if let Err(e) = self.verifier.verify(payload, signature) {
            tracing::warn!(error = %e, "Rejecting unauthenticated webhook");
            return WebhookOutcome::Unauthenticated;
        }

        let event = match parse_event(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Authenticated webhook has an unreadable body");
                return WebhookOutcome::Ignored;
            }
        };

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            object_id = %event.data.object.id,
            "Processing webhook event"
        );

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => {
                self.handle_checkout_completed(&event.data.object.id).await
            }
            "payment_intent.succeeded" => {
                self.handle_payment_intent_succeeded(&event.data.object.id)
                    .await
            }
            _ => {
                tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
                WebhookOutcome::Ignored
            }
        };

        if let WebhookOutcome::Degraded { failures } = &outcome {
            for failure in failures {
                tracing::error!(
                    event_id = %event.id,
                    step = %failure.step,
                    error = %failure.error,
                    "Webhook step failed; acknowledging for redelivery"
                );
            }
        }
        outcome
    }

    async fn handle_checkout_completed(&self, session_id: &str) -> WebhookOutcome {
        let session = match self.gateway.retrieve_checkout_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                return WebhookOutcome::Degraded {
                    failures: vec![StepFailure {
                        step: ReconcileStep::LoadSession,
                        error: e.to_string(),
                    }],
                };
            }
        };

        let mut failures = Vec::new();

        if let Some(customer_id) = session.customer_id.as_deref() {
            let update = CustomerUpdate {
                metadata: session.metadata.clone(),
                name: session.customer_details.name.clone(),
                phone: session.customer_details.phone.clone(),
            };
            if let Err(e) = self.gateway.update_customer(customer_id, &update).await {
                failures.push(StepFailure {
                    step: ReconcileStep::UpdateCustomer,
                    error: e.to_string(),
                });
            }
        }

        match self.mirror.reconcile(&session).await {
            Ok(outcome) => {
                tracing::info!(
                    session_id = %session.id,
                    invoice_id = %outcome.invoice_id,
                    created = outcome.created,
                    finalized = outcome.finalized,
                    marked_paid = outcome.marked_paid,
                    "Mirror invoice reconciled"
                );
            }
            Err(e) => failures.push(StepFailure {
                step: ReconcileStep::MirrorInvoice,
                error: e.to_string(),
            }),
        }

        // Attribution and reporting run whatever happened to the mirror
        self.emit_checkout_purchase(&session).await;

        WebhookOutcome::from_failures(failures)
    }

    async fn emit_checkout_purchase(&self, session: &CheckoutSession) {
        let total = session
            .amount_total
            .unwrap_or_else(|| session.line_items.iter().map(|li| li.billed_amount()).sum());
        let currency = session
            .currency
            .clone()
            .or_else(|| session.line_items.first().and_then(|li| li.currency.clone()))
            .unwrap_or_default();

        let event = ConversionEvent::purchase(&session.id, &currency, total, session.price_ids())
            .with_email(session.customer_details.email.as_deref())
            .with_source_url(session.url.clone());
        self.attribution.dispatch(&event).await;

        let order = OrderReport::new(
            &session.id,
            OrderStatus::Paid,
            session.created,
            OrderCustomer::from(&session.customer_details),
            session.line_items.iter().map(OrderProduct::from).collect(),
            session.utm_tags(),
            self.commission.split(total),
            &currency,
        );
        self.orders.report(&order).await;
    }

    async fn handle_payment_intent_succeeded(&self, intent_id: &str) -> WebhookOutcome {
        let intent = match self.gateway.retrieve_payment_intent(intent_id).await {
            Ok(intent) => intent,
            Err(e) => {
                return WebhookOutcome::Degraded {
                    failures: vec![StepFailure {
                        step: ReconcileStep::LoadPaymentIntent,
                        error: e.to_string(),
                    }],
                };
            }
        };

        if !intent.is_upsell() {
            tracing::debug!(intent_id = %intent.id, "Payment intent is not an upsell, ignoring");
            return WebhookOutcome::Ignored;
        }

        self.emit_upsell_purchase(&intent).await;
        WebhookOutcome::Reconciled
    }

    async fn emit_upsell_purchase(&self, intent: &PaymentIntent) {
        let price_id = intent
            .metadata
            .get("price_id")
            .filter(|p| !p.is_empty())
            .cloned();
        let names = self.upsell_names(price_id.as_deref()).await;
        let contact = resolve_buyer_contact(self.gateway.as_ref(), intent).await;
        let quantity = intent
            .metadata
            .get("quantity")
            .and_then(|q| q.parse::<u64>().ok())
            .unwrap_or(1);

        let event = ConversionEvent::purchase(
            &intent.id,
            &intent.currency,
            intent.amount,
            price_id.iter().cloned().collect(),
        )
        .with_email(contact.email.as_deref());
        self.attribution.dispatch(&event).await;

        let order = OrderReport::new(
            &intent.id,
            OrderStatus::Paid,
            intent.created,
            OrderCustomer {
                name: contact.name.unwrap_or_default(),
                email: contact.email.unwrap_or_default(),
                phone: contact.phone,
                document: None,
            },
            vec![OrderProduct {
                id: names
                    .product_id
                    .or_else(|| price_id.clone())
                    .unwrap_or_default(),
                name: names.product_name,
                plan_id: price_id.unwrap_or_default(),
                plan_name: Some(names.plan_name),
                quantity,
                price_in_cents: intent.amount,
            }],
            UtmTags::from_metadata(&intent.metadata),
            self.commission.split(intent.amount),
            &intent.currency,
        );
        self.orders.report(&order).await;
    }

    /// Display names for an upsell price; lookup failures fall back to a placeholder
    async fn upsell_names(&self, price_id: Option<&str>) -> UpsellNames {
        let mut names = UpsellNames {
            product_id: None,
            product_name: UPSELL_FALLBACK_NAME.to_string(),
            plan_name: UPSELL_FALLBACK_NAME.to_string(),
        };
        let Some(price_id) = price_id else {
            return names;
        };

        match self.gateway.retrieve_price(price_id).await {
            Ok(price) => {
                if let Some(nickname) = price.nickname.filter(|n| !n.is_empty()) {
                    names.plan_name = nickname;
                }
                names.product_name = names.plan_name.clone();
                if let Some(product) = price.product {
                    if let Some(name) = product.name.filter(|n| !n.is_empty()) {
                        names.product_name = name;
                    }
                    names.product_id = Some(product.id);
                }
            }
            Err(e) => {
                tracing::warn!(price_id = %price_id, error = %e, "Upsell name lookup failed");
            }
        }
        names
    }
}

struct UpsellNames {
    product_id: Option<String>,
    product_name: String,
    plan_name: String,
}
