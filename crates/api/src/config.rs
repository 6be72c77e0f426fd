//! Application configuration

use std::env;

const DEFAULT_PORT: &str = "8000";

/// Server configuration loaded from environment variables.
///
/// Billing settings live in `funnel_billing::BillingConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // CORS
    pub cors_allowed_origins: Vec<String>,
    /// Domains whose https subdomains may call the API (e.g. "example.com")
    pub cors_allowed_origin_suffixes: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_address = match env::var("BIND_ADDRESS") {
            Ok(address) => address,
            Err(_) => {
                let port = env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
                let port: u16 = port
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("PORT must be a valid port number"))?;
                format!("0.0.0.0:{}", port)
            }
        };

        Ok(Self {
            bind_address,
            cors_allowed_origins: list_var("CORS_ALLOWED_ORIGINS")
                .into_iter()
                .map(|origin| origin.trim_end_matches('/').to_string())
                .collect(),
            cors_allowed_origin_suffixes: list_var("CORS_ALLOWED_ORIGIN_SUFFIXES")
                .into_iter()
                .map(|suffix| suffix.trim_start_matches('.').to_lowercase())
                .collect(),
        })
    }
}

/// Comma-separated list, blanks dropped
fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
