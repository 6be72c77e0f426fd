//! Deterministic idempotency keys for provider mutations
//!
//! Every key is derived only from the identifiers of the business operation it
//! guards, so a redelivered webhook or a double-submitted upsell derives the
//! same key as the first attempt. Each operation kind has its own prefix or
//! suffix, so keys of different operations never collide.

use std::fmt;

/// Idempotency key passed to the provider with a mutating call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Pending invoice item mirroring one checkout line item
    pub fn invoice_item(session_id: &str, line_item_id: &str) -> Self {
        Self(format!("cs:{}:ii:{}", session_id, line_item_id))
    }

    /// Invoice item attached straight to an existing draft invoice
    pub fn attached_invoice_item(session_id: &str, line_item_id: &str) -> Self {
        Self(format!("cs:{}:ii:{}:attach", session_id, line_item_id))
    }

    /// Creation of the mirror invoice for a session
    pub fn mirror_invoice(session_id: &str) -> Self {
        Self(format!("cs:{}:invoice", session_id))
    }

    /// Finalization of a mirror invoice
    pub fn finalize(invoice_id: &str) -> Self {
        Self(format!("invoice:{}:finalize", invoice_id))
    }

    /// Out-of-band payment of a mirror invoice
    pub fn pay(invoice_id: &str) -> Self {
        Self(format!("invoice:{}:pay", invoice_id))
    }

    /// One-click upsell charge
    pub fn upsell(session_id: &str, price_id: &str, quantity: u64) -> Self {
        Self(format!("upsell:{}:{}:{}", session_id, price_id, quantity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
