//! Typed records for the provider objects the funnel reads and writes
//!
//! Absent provider fields are `None` (or empty), never a lookup error.

use std::collections::HashMap;

use serde::{de, Deserialize, Deserializer, Serialize};

/// Metadata key binding mirror invoices and items to their checkout session
pub const PARENT_SESSION_KEY: &str = "parent_session_id";
/// Metadata key binding a mirror item to its checkout line item
pub const LINE_ITEM_KEY: &str = "line_item_id";
/// Metadata marker set on upsell payment intents
pub const UPSELL_MARKER_KEY: &str = "upsell";

/// The five UTM tracking parameters carried through the funnel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtmTags {
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: String,
    pub utm_content: String,
}

impl UtmTags {
    pub const KEYS: [&'static str; 5] = [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
    ];

    /// Read the tags out of a metadata map, defaulting missing keys to ""
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        let get = |key: &str| metadata.get(key).cloned().unwrap_or_default();
        Self {
            utm_source: get("utm_source"),
            utm_medium: get("utm_medium"),
            utm_campaign: get("utm_campaign"),
            utm_term: get("utm_term"),
            utm_content: get("utm_content"),
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("utm_source".to_string(), self.utm_source.clone()),
            ("utm_medium".to_string(), self.utm_medium.clone()),
            ("utm_campaign".to_string(), self.utm_campaign.clone()),
            ("utm_term".to_string(), self.utm_term.clone()),
            ("utm_content".to_string(), self.utm_content.clone()),
        ])
    }
}

/// Quantity sent by a browser form: a whole number, given either as a JSON
/// number or as a numeric string
pub fn deserialize_quantity<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let invalid = || <D::Error as de::Error>::custom("quantity must be a non-negative whole number");
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_u64().ok_or_else(invalid),
        serde_json::Value::String(s) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Buyer details collected by the hosted checkout page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerDetails {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// One purchased line of a checkout session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineItem {
    pub id: String,
    pub price_id: String,
    pub price_nickname: Option<String>,
    pub product_name: Option<String>,
    pub description: Option<String>,
    pub quantity: u64,
    pub unit_amount: Option<i64>,
    pub amount_subtotal: Option<i64>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

impl LineItem {
    /// Amount this line contributes, in minor units.
    ///
    /// Falls back from the total to the subtotal, then to unit price × quantity.
    pub fn billed_amount(&self) -> i64 {
        self.amount_total
            .or(self.amount_subtotal)
            .unwrap_or_else(|| {
                let quantity = i64::try_from(self.quantity.max(1)).unwrap_or(1);
                self.unit_amount.unwrap_or(0).saturating_mul(quantity)
            })
    }
}

/// A checkout session as seen by the reconciliation engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub currency: Option<String>,
    pub amount_total: Option<i64>,
    pub customer_id: Option<String>,
    pub customer_details: CustomerDetails,
    pub metadata: HashMap<String, String>,
    pub line_items: Vec<LineItem>,
    /// Unix seconds
    pub created: i64,
    /// Payment method used by the session's payment intent, if any
    pub payment_method_id: Option<String>,
}

impl CheckoutSession {
    pub fn utm_tags(&self) -> UtmTags {
        UtmTags::from_metadata(&self.metadata)
    }

    pub fn price_ids(&self) -> Vec<String> {
        self.line_items.iter().map(|li| li.price_id.clone()).collect()
    }
}

/// Lifecycle status of a mirror invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    /// Provider status `open`
    Finalized,
    Paid,
    Void,
    Uncollectible,
}

impl InvoiceStatus {
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "draft" => Some(Self::Draft),
            "open" => Some(Self::Finalized),
            "paid" => Some(Self::Paid),
            "void" => Some(Self::Void),
            "uncollectible" => Some(Self::Uncollectible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Finalized => "open",
            Self::Paid => "paid",
            Self::Void => "void",
            Self::Uncollectible => "uncollectible",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice item mirroring a checkout line item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorInvoiceItem {
    pub id: String,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
    /// `None` while the item is pending (not yet on any invoice)
    pub invoice_id: Option<String>,
}

impl MirrorInvoiceItem {
    pub fn parent_session_id(&self) -> Option<&str> {
        self.metadata.get(PARENT_SESSION_KEY).map(String::as_str)
    }

    pub fn line_item_id(&self) -> Option<&str> {
        self.metadata.get(LINE_ITEM_KEY).map(String::as_str)
    }

    pub fn is_pending(&self) -> bool {
        self.invoice_id.is_none()
    }
}

/// Invoice record kept as a bookkeeping mirror of a captured payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorInvoice {
    pub id: String,
    pub customer_id: String,
    pub currency: Option<String>,
    pub status: InvoiceStatus,
    pub metadata: HashMap<String, String>,
    pub collection_method: Option<String>,
    pub due_date: Option<i64>,
    pub footer: Option<String>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub hosted_invoice_url: Option<String>,
}

impl MirrorInvoice {
    pub fn parent_session_id(&self) -> Option<&str> {
        self.metadata.get(PARENT_SESSION_KEY).map(String::as_str)
    }
}

/// Pending invoice item to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoiceItem {
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
    /// Attach directly to this draft instead of leaving the item pending
    pub invoice_id: Option<String>,
}

/// Descriptive fields applied to a mirror invoice on creation and re-applied
/// to a located draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceFields {
    pub days_until_due: u32,
    pub description: String,
    pub footer: String,
}

/// Mirror invoice to create from the customer's pending items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMirrorInvoice {
    pub customer_id: String,
    pub currency: String,
    pub fields: InvoiceFields,
    pub metadata: HashMap<String, String>,
}

/// Fields copied onto the customer record after checkout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerUpdate {
    pub metadata: HashMap<String, String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// Customer record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub default_payment_method: Option<String>,
}

/// Product a price belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRef {
    pub id: String,
    pub name: Option<String>,
}

/// Price record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub id: String,
    pub nickname: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: String,
    pub product: Option<ProductRef>,
}

/// Billing details captured on a charge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingDetails {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Charge made by a payment intent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Charge {
    pub id: String,
    pub billing_details: BillingDetails,
}

/// Payment intent (used for upsell charges)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub client_secret: Option<String>,
    /// Unix seconds
    pub created: i64,
    /// Charge list (only returned by older API versions)
    pub charges: Vec<Charge>,
    pub latest_charge: Option<Charge>,
}

impl PaymentIntent {
    pub fn is_upsell(&self) -> bool {
        self.metadata.get(UPSELL_MARKER_KEY).map(String::as_str) == Some("true")
    }
}

/// Payment intent to create for an upsell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentIntent {
    pub amount: i64,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub metadata: HashMap<String, String>,
}

/// Checkout session to create for the first purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCheckoutSession {
    pub price_id: String,
    pub quantity: u64,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub utm: UtmTags,
}
