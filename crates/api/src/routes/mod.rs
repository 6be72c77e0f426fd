//! API routes

pub mod billing;
pub mod health;

use axum::{
    http::{HeaderMap, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::Config, state::AppState};

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// True when `origin` is listed exactly or is an https subdomain of an
/// allowed suffix
pub fn is_allowed_origin(config: &Config, origin: &str) -> bool {
    let origin = origin.trim_end_matches('/');
    if config.cors_allowed_origins.iter().any(|o| o == origin) {
        return true;
    }

    let Some(host) = origin.strip_prefix("https://") else {
        return false;
    };
    let host = host.split(':').next().unwrap_or(host).to_lowercase();
    config
        .cors_allowed_origin_suffixes
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
}

/// Credentialed CORS for the storefront origins
fn cors_layer(config: &Config) -> CorsLayer {
    let config = config.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _| {
                origin
                    .to_str()
                    .map(|origin| is_allowed_origin(&config, origin))
                    .unwrap_or(false)
            },
        ))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/ping", post(health::ping));

    // Stripe webhook (public, uses signature verification)
    let billing_routes = Router::new()
        .route("/webhook", post(billing::webhook))
        .route("/upsell/intent", post(billing::create_upsell_intent))
        .route(
            "/create-checkout-session",
            post(billing::create_checkout_session),
        );

    Router::new()
        .merge(health_routes)
        .merge(billing_routes)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
