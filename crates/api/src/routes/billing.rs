//! Funnel payment routes: checkout, one-click upsells and the Stripe webhook

use axum::{
    extract::{rejection::JsonRejection, OriginalUri, State},
    http::{header, HeaderMap},
    Json,
};
use funnel_billing::types::deserialize_quantity;
use funnel_billing::{CheckoutContext, CheckoutRequest, CheckoutResponse, UpsellAuthorization};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    routes::extract_client_ip,
    state::AppState,
};

/// Acknowledgement returned to Stripe for every authenticated delivery
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Request to charge an upsell against the card saved at checkout.
///
/// The upsell page reads the session id from the `sid` query parameter of
/// the checkout success URL and posts it back under the same name.
#[derive(Debug, Deserialize)]
pub struct UpsellIntentRequest {
    #[serde(default, rename = "sid", alias = "session_id")]
    pub session_id: String,
    #[serde(default)]
    pub price_id: String,
    #[serde(default = "default_quantity", deserialize_with = "deserialize_quantity")]
    pub quantity: u64,
}

fn default_quantity() -> u64 {
    1
}

/// Stripe webhook endpoint.
///
/// Only an authentication failure is reported back as an error; once the
/// delivery is authentic it is acknowledged even if part of the pipeline
/// failed, and the failures are logged.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookAck>> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if signature.is_empty() {
        tracing::warn!("Stripe webhook missing signature header");
    }

    let outcome = state.billing.webhooks.handle(&body, signature).await;
    if !outcome.acknowledges() {
        return Err(ApiError::InvalidSignature);
    }

    Ok(Json(WebhookAck { received: true }))
}

/// Create a payment intent for a one-click upsell
pub async fn create_upsell_intent(
    State(state): State<AppState>,
    payload: Result<Json<UpsellIntentRequest>, JsonRejection>,
) -> ApiResult<Json<UpsellAuthorization>> {
    let Json(req) = payload?;
    let authorization = state
        .billing
        .upsell
        .authorize(&req.session_id, &req.price_id, req.quantity)
        .await?;

    Ok(Json(authorization))
}

/// Open a hosted checkout page for the landing page's buy button
pub async fn create_checkout_session(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let Json(req) = payload?;
    let context = CheckoutContext {
        client_ip: extract_client_ip(&headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        source_url: headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|host| format!("https://{}{}", host, uri.path())),
    };

    let response = state.billing.checkout.create_checkout(&req, &context).await?;

    Ok(Json(response))
}
