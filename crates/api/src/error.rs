//! API error types and handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use funnel_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Billing errors
    #[error("No saved payment method; redirect to checkout")]
    NoSavedPaymentMethod,

    // Internal errors
    #[error("Payment provider error: {0}")]
    Provider(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidSignature => {
                (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", self.to_string())
            }

            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Billing
            ApiError::NoSavedPaymentMethod => (
                StatusCode::CONFLICT,
                "NO_SAVED_PAYMENT_METHOD",
                self.to_string(),
            ),

            // Internal
            ApiError::Provider(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROVIDER_ERROR",
                "Payment provider error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInput(msg) => ApiError::BadRequest(msg),
            BillingError::SessionWithoutCustomer(_) => ApiError::BadRequest(err.to_string()),
            BillingError::NoSavedPaymentMethod => ApiError::NoSavedPaymentMethod,
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            other => {
                tracing::error!(error = %other, "Billing operation failed");
                ApiError::Provider(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection.body_text(), "Rejected request body");
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_error_mapping() {
        let cases = [
            (
                BillingError::InvalidInput("price_id is required".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::SessionWithoutCustomer("cs_1".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (BillingError::NoSavedPaymentMethod, StatusCode::CONFLICT),
            (
                BillingError::StripeApi("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
