//! Conversion events for the ad-attribution platform (Meta Conversions API)
//!
//! Dispatch is fire-and-forget: a failed or skipped send is logged and
//! reported as `false`, never as an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Default Graph API base used for the Conversions API
pub const DEFAULT_CONVERSIONS_API_BASE: &str = "https://graph.facebook.com/v14.0";

/// Upper bound for one Conversions API request
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Conversions API configuration
#[derive(Debug, Clone)]
pub struct ConversionsConfig {
    /// Pixel (dataset) the events are recorded against
    pub pixel_id: String,
    /// Conversions API access token
    pub access_token: String,
    /// Graph API base URL, without trailing slash
    pub api_base: String,
}

impl ConversionsConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            pixel_id: std::env::var("PIXEL_ID").unwrap_or_default(),
            access_token: std::env::var("ACCESS_TOKEN").unwrap_or_default(),
            api_base: std::env::var("CONVERSIONS_API_BASE")
                .unwrap_or_else(|_| DEFAULT_CONVERSIONS_API_BASE.to_string()),
        }
    }

    /// Check if event dispatch is enabled
    pub fn is_enabled(&self) -> bool {
        !self.pixel_id.is_empty() && !self.access_token.is_empty()
    }

    fn events_url(&self) -> String {
        format!("{}/{}/events", self.api_base.trim_end_matches('/'), self.pixel_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventName {
    InitiateCheckout,
    Purchase,
}

/// Identifiers of the user behind an event; only hashed PII leaves the service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserData {
    /// SHA-256 of the normalised email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub em: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomData {
    pub currency: String,
    /// Major currency units
    pub value: f64,
    pub content_ids: Vec<String>,
    pub content_type: &'static str,
}

/// A single server-side conversion event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionEvent {
    pub event_name: EventName,
    /// Unix seconds
    pub event_time: i64,
    /// Deduplication id shared with the browser pixel
    pub event_id: String,
    pub action_source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source_url: Option<String>,
    pub user_data: UserData,
    pub custom_data: CustomData,
}

impl ConversionEvent {
    /// Build an event for an amount in minor units
    pub fn new(
        event_name: EventName,
        event_id: impl Into<String>,
        currency: &str,
        amount_minor: i64,
        content_ids: Vec<String>,
    ) -> Self {
        Self {
            event_name,
            event_time: chrono::Utc::now().timestamp(),
            event_id: event_id.into(),
            action_source: "website",
            event_source_url: None,
            user_data: UserData::default(),
            custom_data: CustomData {
                currency: currency.to_lowercase(),
                value: minor_to_major(amount_minor),
                content_ids,
                content_type: "product",
            },
        }
    }

    pub fn purchase(
        event_id: impl Into<String>,
        currency: &str,
        amount_minor: i64,
        content_ids: Vec<String>,
    ) -> Self {
        Self::new(EventName::Purchase, event_id, currency, amount_minor, content_ids)
    }

    pub fn initiate_checkout(
        event_id: impl Into<String>,
        currency: &str,
        amount_minor: i64,
        content_ids: Vec<String>,
    ) -> Self {
        Self::new(
            EventName::InitiateCheckout,
            event_id,
            currency,
            amount_minor,
            content_ids,
        )
    }

    /// Attach the buyer's email, hashed
    pub fn with_email(mut self, email: Option<&str>) -> Self {
        self.user_data.em = email.and_then(hash_email);
        self
    }

    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.user_data.client_ip_address = ip;
        self.user_data.client_user_agent = user_agent;
        self
    }

    pub fn with_source_url(mut self, url: Option<String>) -> Self {
        self.event_source_url = url;
        self
    }
}

fn minor_to_major(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}

/// SHA-256 hex digest of a trimmed, lower-cased email. Blank input yields `None`.
pub fn hash_email(email: &str) -> Option<String> {
    let normalised = email.trim().to_lowercase();
    if normalised.is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(normalised.as_bytes())))
}

/// Sink for conversion events
#[async_trait]
pub trait ConversionDispatcher: Send + Sync {
    /// Send one event. Returns `true` when the platform accepted it.
    async fn dispatch(&self, event: &ConversionEvent) -> bool;
}

/// Conversions API client
#[derive(Clone)]
pub struct ConversionsApiClient {
    config: ConversionsConfig,
    client: reqwest::Client,
}

impl ConversionsApiClient {
    pub fn new(config: ConversionsConfig) -> Self {
        Self::with_timeout(config, SINK_TIMEOUT)
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(config: ConversionsConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(ConversionsConfig::from_env())
    }
}

#[derive(Serialize)]
struct EventBatch<'a> {
    data: [&'a ConversionEvent; 1],
}

#[async_trait]
impl ConversionDispatcher for ConversionsApiClient {
    async fn dispatch(&self, event: &ConversionEvent) -> bool {
        if !self.config.is_enabled() {
            tracing::warn!(
                event_name = ?event.event_name,
                event_id = %event.event_id,
                "Conversions API not configured, skipping"
            );
            return false;
        }

        let response = self
            .client
            .post(self.config.events_url())
            .query(&[("access_token", self.config.access_token.as_str())])
            .json(&EventBatch { data: [event] })
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(
                    event_name = ?event.event_name,
                    event_id = %event.event_id,
                    "Conversion event sent"
                );
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    event_name = ?event.event_name,
                    event_id = %event.event_id,
                    status = %status,
                    body = %body,
                    "Conversion event rejected - non-fatal"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    event_name = ?event.event_name,
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to send conversion event - non-fatal"
                );
                false
            }
        }
    }
}
