//! Invoice mirror state machine
//!
//! A completed checkout session is mirrored into exactly one Stripe invoice,
//! tagged with `parent_session_id`, and driven to `paid` out of band. Nothing
//! is stored locally: each run locates its invoice by tag and resumes from
//! whatever state the previous run left behind.
//!
//! ```text
//!   (absent) --provision items + create--> draft --finalize--> open --pay--> paid
//! ```
//!
//! Every mutating call carries an idempotency key derived from the session,
//! line item or invoice it acts on, so overlapping runs collapse into the
//! same provider objects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::gateway::ProviderGateway;
use crate::idempotency::IdempotencyKey;
use crate::types::{
    CheckoutSession, InvoiceFields, InvoiceStatus, LineItem, MirrorInvoice, NewInvoiceItem,
    NewMirrorInvoice, LINE_ITEM_KEY, PARENT_SESSION_KEY,
};

const MIRROR_SOURCE_KEY: &str = "source";
const MIRROR_SOURCE: &str = "mirror_checkout_session";
const FALLBACK_ITEM_DESCRIPTION: &str = "Item";

/// Descriptive settings applied to every mirror invoice
#[derive(Debug, Clone)]
pub struct InvoiceMirrorConfig {
    pub footer: String,
    pub days_until_due: u32,
    pub description: String,
    /// Currency used when neither the line items nor the session carry one
    pub default_currency: String,
}

impl Default for InvoiceMirrorConfig {
    fn default() -> Self {
        Self {
            footer: "Thank you for your purchase. Follow the link in your confirmation email to access the material.".to_string(),
            days_until_due: 30,
            description: "Checkout purchase".to_string(),
            default_currency: "usd".to_string(),
        }
    }
}

impl InvoiceMirrorConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            footer: std::env::var("INVOICE_FOOTER").unwrap_or(defaults.footer),
            days_until_due: std::env::var("INVOICE_DAYS_UNTIL_DUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.days_until_due),
            description: std::env::var("INVOICE_DESCRIPTION").unwrap_or(defaults.description),
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.default_currency),
        }
    }

    fn fields(&self) -> InvoiceFields {
        InvoiceFields {
            days_until_due: self.days_until_due,
            description: self.description.clone(),
            footer: self.footer.clone(),
        }
    }
}

/// What a reconciliation run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorOutcome {
    pub invoice_id: String,
    pub status: InvoiceStatus,
    /// The invoice was created by this run
    pub created: bool,
    pub finalized: bool,
    pub marked_paid: bool,
}

/// Drives a checkout session's mirror invoice to `paid`
#[derive(Clone)]
pub struct InvoiceMirror {
    gateway: Arc<dyn ProviderGateway>,
    config: InvoiceMirrorConfig,
}

impl InvoiceMirror {
    pub fn new(gateway: Arc<dyn ProviderGateway>, config: InvoiceMirrorConfig) -> Self {
        Self { gateway, config }
    }

    /// Run the state machine for a completed session.
    ///
    /// Any failure aborts the remaining steps; state already committed stays
    /// in place and the next run resumes from it.
    pub async fn reconcile(&self, session: &CheckoutSession) -> BillingResult<MirrorOutcome> {
        let customer_id = session
            .customer_id
            .as_deref()
            .ok_or_else(|| BillingError::SessionWithoutCustomer(session.id.clone()))?;

        let (mut invoice, created) = match self.locate(customer_id, &session.id).await? {
            Some(invoice) => {
                tracing::info!(
                    session_id = %session.id,
                    invoice_id = %invoice.id,
                    status = %invoice.status,
                    "Resuming existing mirror invoice"
                );
                (self.refresh_draft(invoice).await?, false)
            }
            None => {
                let currency = self.provision_items(session, customer_id).await?;
                let invoice = self.create_invoice(session, customer_id, &currency).await?;
                (invoice, true)
            }
        };

        ensure_payable(&invoice)?;

        let mut finalized = false;
        if invoice.status == InvoiceStatus::Draft {
            self.sync_draft_items(session, customer_id, &invoice).await?;
            invoice = self
                .gateway
                .finalize_invoice(&invoice.id, &IdempotencyKey::finalize(&invoice.id))
                .await?;
            finalized = true;
            tracing::info!(
                session_id = %session.id,
                invoice_id = %invoice.id,
                amount_due = invoice.amount_due,
                "Mirror invoice finalized"
            );
            ensure_payable(&invoice)?;
        }

        let mut marked_paid = false;
        if invoice.status != InvoiceStatus::Paid {
            invoice = self
                .gateway
                .pay_invoice_out_of_band(&invoice.id, &IdempotencyKey::pay(&invoice.id))
                .await?;
            marked_paid = true;
            tracing::info!(
                session_id = %session.id,
                invoice_id = %invoice.id,
                amount_paid = invoice.amount_paid,
                "Mirror invoice marked paid out of band"
            );
        }

        Ok(MirrorOutcome {
            invoice_id: invoice.id,
            status: invoice.status,
            created,
            finalized,
            marked_paid,
        })
    }

    /// Search all of the customer's invoices for the one tagged with this session
    async fn locate(
        &self,
        customer_id: &str,
        session_id: &str,
    ) -> BillingResult<Option<MirrorInvoice>> {
        let invoices = self.gateway.list_invoices(customer_id).await?;
        Ok(invoices
            .into_iter()
            .find(|inv| inv.parent_session_id() == Some(session_id)))
    }

    /// Re-apply the descriptive fields to a located draft
    async fn refresh_draft(&self, invoice: MirrorInvoice) -> BillingResult<MirrorInvoice> {
        if invoice.status != InvoiceStatus::Draft {
            return Ok(invoice);
        }
        self.gateway
            .update_invoice(&invoice.id, &self.config.fields())
            .await
    }

    /// Leave exactly this session's line items pending for the customer.
    ///
    /// Returns the currency the invoice will be issued in.
    async fn provision_items(
        &self,
        session: &CheckoutSession,
        customer_id: &str,
    ) -> BillingResult<String> {
        if session.line_items.is_empty() {
            return Err(BillingError::NoLineItems(session.id.clone()));
        }
        let currency = self.invoice_currency(session);

        let mut reusable = HashSet::new();
        for item in self.gateway.list_pending_invoice_items(customer_id).await? {
            match (item.parent_session_id(), item.line_item_id()) {
                (Some(parent), Some(line_item)) if parent == session.id => {
                    reusable.insert(line_item.to_string());
                }
                _ => {
                    tracing::warn!(
                        session_id = %session.id,
                        item_id = %item.id,
                        foreign_session = ?item.parent_session_id(),
                        "Purging stale pending invoice item"
                    );
                    self.gateway.delete_invoice_item(&item.id).await?;
                }
            }
        }

        for line_item in &session.line_items {
            if reusable.contains(&line_item.id) {
                continue;
            }
            let item = mirror_item(session, customer_id, line_item, &currency, None);
            let created = self
                .gateway
                .create_invoice_item(
                    &item,
                    &IdempotencyKey::invoice_item(&session.id, &line_item.id),
                )
                .await?;
            tracing::info!(
                session_id = %session.id,
                item_id = %created.id,
                amount = created.amount,
                currency = %currency,
                "Pending mirror invoice item created"
            );
        }

        Ok(currency)
    }

    async fn create_invoice(
        &self,
        session: &CheckoutSession,
        customer_id: &str,
        currency: &str,
    ) -> BillingResult<MirrorInvoice> {
        let mut metadata = session.metadata.clone();
        metadata.insert(PARENT_SESSION_KEY.to_string(), session.id.clone());

        let invoice = self
            .gateway
            .create_invoice(
                &NewMirrorInvoice {
                    customer_id: customer_id.to_string(),
                    currency: currency.to_string(),
                    fields: self.config.fields(),
                    metadata,
                },
                &IdempotencyKey::mirror_invoice(&session.id),
            )
            .await?;

        tracing::info!(
            session_id = %session.id,
            invoice_id = %invoice.id,
            "Mirror invoice draft created"
        );
        Ok(invoice)
    }

    /// Make a draft carry exactly this session's line items.
    ///
    /// Invoice creation sweeps every pending item of the customer, so a
    /// concurrent run for another session can leave its items on this draft
    /// (or take ours onto its own).
    async fn sync_draft_items(
        &self,
        session: &CheckoutSession,
        customer_id: &str,
        invoice: &MirrorInvoice,
    ) -> BillingResult<()> {
        let mut present = HashSet::new();
        for item in self.gateway.list_invoice_items(&invoice.id).await? {
            match (item.parent_session_id(), item.line_item_id()) {
                (Some(parent), Some(line_item)) if parent == session.id => {
                    present.insert(line_item.to_string());
                }
                _ => {
                    tracing::warn!(
                        session_id = %session.id,
                        invoice_id = %invoice.id,
                        item_id = %item.id,
                        "Removing foreign item from mirror draft"
                    );
                    self.gateway.delete_invoice_item(&item.id).await?;
                }
            }
        }

        let currency = invoice
            .currency
            .clone()
            .unwrap_or_else(|| self.invoice_currency(session));

        for line_item in &session.line_items {
            if present.contains(&line_item.id) {
                continue;
            }
            let item = mirror_item(
                session,
                customer_id,
                line_item,
                &currency,
                Some(invoice.id.clone()),
            );
            self.gateway
                .create_invoice_item(
                    &item,
                    &IdempotencyKey::attached_invoice_item(&session.id, &line_item.id),
                )
                .await?;
            tracing::info!(
                session_id = %session.id,
                invoice_id = %invoice.id,
                line_item_id = %line_item.id,
                "Missing line item attached to mirror draft"
            );
        }

        Ok(())
    }

    fn invoice_currency(&self, session: &CheckoutSession) -> String {
        session
            .line_items
            .first()
            .and_then(|li| li.currency.as_deref())
            .or(session.currency.as_deref())
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.config.default_currency)
            .to_lowercase()
    }
}

fn ensure_payable(invoice: &MirrorInvoice) -> BillingResult<()> {
    match invoice.status {
        InvoiceStatus::Void | InvoiceStatus::Uncollectible => {
            Err(BillingError::InvoiceNotPayable {
                invoice_id: invoice.id.clone(),
                status: invoice.status.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn mirror_item(
    session: &CheckoutSession,
    customer_id: &str,
    line_item: &LineItem,
    currency: &str,
    invoice_id: Option<String>,
) -> NewInvoiceItem {
    NewInvoiceItem {
        customer_id: customer_id.to_string(),
        amount: line_item.billed_amount(),
        currency: currency.to_string(),
        description: item_description(line_item),
        metadata: HashMap::from([
            (MIRROR_SOURCE_KEY.to_string(), MIRROR_SOURCE.to_string()),
            (PARENT_SESSION_KEY.to_string(), session.id.clone()),
            (LINE_ITEM_KEY.to_string(), line_item.id.clone()),
        ]),
        invoice_id,
    }
}

/// Product name, then price nickname, then line description
fn item_description(line_item: &LineItem) -> String {
    let raw = [
        line_item.product_name.as_deref(),
        line_item.price_nickname.as_deref(),
        line_item.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|s| !s.trim().is_empty())
    .unwrap_or(FALLBACK_ITEM_DESCRIPTION);

    let cleaned = clean_description(raw);
    if cleaned.is_empty() {
        FALLBACK_ITEM_DESCRIPTION.to_string()
    } else {
        cleaned
    }
}

/// Strip a trailing `(Session cs_…)` marker left by the checkout page
pub fn clean_description(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(head) = trimmed.strip_suffix(')') {
        if let Some(open) = head.rfind('(') {
            if let Some(rest) = head[open + 1..].strip_prefix("Session") {
                let id = rest.trim_start();
                let separated = id.len() < rest.len();
                let is_session_id = id
                    .strip_prefix("cs_")
                    .is_some_and(|tail| {
                        !tail.is_empty()
                            && tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    });
                if separated && is_session_id {
                    return head[..open].trim().to_string();
                }
            }
        }
    }
    trimmed.to_string()
}
