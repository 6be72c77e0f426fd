//! Buyer contact resolution for upsell purchases
//!
//! Upsell payments carry no checkout-page customer details, so name, email and
//! phone are assembled from an ordered list of sources. Each field takes the
//! first non-empty value found; the customer record is only fetched when a
//! field is still missing after the charge sources.

use crate::gateway::ProviderGateway;
use crate::types::{BillingDetails, PaymentIntent};

/// Where a contact field may come from, in lookup order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactSource {
    /// Billing details of the first charge in the intent's charge list
    ChargeBilling,
    /// Billing details of the intent's latest charge
    LatestChargeBilling,
    /// The provider's customer record
    CustomerRecord,
}

impl ContactSource {
    pub const ORDER: [ContactSource; 3] = [
        ContactSource::ChargeBilling,
        ContactSource::LatestChargeBilling,
        ContactSource::CustomerRecord,
    ];
}

/// Buyer contact details, each field possibly unknown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuyerContact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl BuyerContact {
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.email.is_some() && self.phone.is_some()
    }

    /// Fill missing fields from another candidate
    fn merge(&mut self, name: Option<&str>, email: Option<&str>, phone: Option<&str>) {
        fill(&mut self.name, name);
        fill(&mut self.email, email);
        fill(&mut self.phone, phone);
    }

    fn merge_billing(&mut self, details: &BillingDetails) {
        self.merge(
            details.name.as_deref(),
            details.email.as_deref(),
            details.phone.as_deref(),
        );
    }
}

fn fill(slot: &mut Option<String>, candidate: Option<&str>) {
    if slot.is_some() {
        return;
    }
    if let Some(value) = candidate.map(str::trim).filter(|v| !v.is_empty()) {
        *slot = Some(value.to_string());
    }
}

/// Resolve the buyer's contact details for a payment intent.
///
/// A failed customer lookup leaves the remaining fields unknown; it never
/// fails the resolution.
pub async fn resolve_buyer_contact(
    gateway: &dyn ProviderGateway,
    intent: &PaymentIntent,
) -> BuyerContact {
    let mut contact = BuyerContact::default();

    for source in ContactSource::ORDER {
        if contact.is_complete() {
            break;
        }
        match source {
            ContactSource::ChargeBilling => {
                if let Some(charge) = intent.charges.first() {
                    contact.merge_billing(&charge.billing_details);
                }
            }
            ContactSource::LatestChargeBilling => {
                if let Some(charge) = &intent.latest_charge {
                    contact.merge_billing(&charge.billing_details);
                }
            }
            ContactSource::CustomerRecord => {
                let Some(customer_id) = intent.customer_id.as_deref() else {
                    continue;
                };
                match gateway.retrieve_customer(customer_id).await {
                    Ok(customer) => contact.merge(
                        customer.name.as_deref(),
                        customer.email.as_deref(),
                        customer.phone.as_deref(),
                    ),
                    Err(e) => {
                        tracing::warn!(
                            intent_id = %intent.id,
                            customer_id = %customer_id,
                            error = %e,
                            "Customer lookup for buyer contact failed"
                        );
                    }
                }
            }
        }
    }

    contact
}
