//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload could not be parsed: {0}")]
    WebhookPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Checkout session {0} has no associated customer")]
    SessionWithoutCustomer(String),

    #[error("No saved payment method; redirect to checkout")]
    NoSavedPaymentMethod,

    #[error("Checkout session {0} has no line items to invoice")]
    NoLineItems(String),

    #[error("Invoice {invoice_id} cannot be paid from status {status}")]
    InvoiceNotPayable { invoice_id: String, status: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl BillingError {
    /// True for conditions the caller can act on (bad input, missing saved card)
    /// as opposed to provider or transport failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidInput(_)
                | BillingError::SessionWithoutCustomer(_)
                | BillingError::NoSavedPaymentMethod
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Http(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
