//! Provider gateway: typed access to the Stripe objects the funnel uses
//!
//! [`ProviderGateway`] is the seam between the reconciliation logic and the
//! payment provider. [`StripeGateway`] talks to Stripe through the
//! `async-stripe` client; tests substitute an in-memory provider.
//!
//! Customers go through the typed `async-stripe` resources. Sessions, invoices,
//! invoice items, prices and payment intents are read into local wire records
//! so that fields added or removed across Stripe API versions (for example the
//! legacy `charges` list on payment intents) degrade to `None` instead of
//! failing deserialization.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stripe::{CustomerId, UpdateCustomer};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::idempotency::IdempotencyKey;
use crate::types::{
    BillingDetails, Charge, CheckoutSession, Customer, CustomerDetails, CustomerUpdate,
    InvoiceFields, InvoiceStatus, LineItem, MirrorInvoice, MirrorInvoiceItem, NewCheckoutSession,
    NewInvoiceItem, NewMirrorInvoice, NewPaymentIntent, PaymentIntent, Price, ProductRef,
};

/// Page size used when walking provider lists
const PAGE_SIZE: u32 = 100;

/// Read and write operations against the payment provider.
///
/// Mutations that could double-execute on retry take an [`IdempotencyKey`];
/// calls sharing a key must be safe to repeat.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> BillingResult<CheckoutSession>;

    /// Retrieve a session together with all of its line items
    async fn retrieve_checkout_session(&self, session_id: &str) -> BillingResult<CheckoutSession>;

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Customer>;

    async fn update_customer(&self, customer_id: &str, update: &CustomerUpdate)
        -> BillingResult<()>;

    /// Every invoice of the customer, across all pages
    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<MirrorInvoice>>;

    /// Invoice items of the customer not yet attached to any invoice
    async fn list_pending_invoice_items(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<MirrorInvoiceItem>>;

    /// Invoice items attached to the given invoice
    async fn list_invoice_items(&self, invoice_id: &str) -> BillingResult<Vec<MirrorInvoiceItem>>;

    async fn create_invoice_item(
        &self,
        item: &NewInvoiceItem,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoiceItem>;

    async fn delete_invoice_item(&self, item_id: &str) -> BillingResult<()>;

    /// Create a draft invoice that pulls in the customer's pending items
    async fn create_invoice(
        &self,
        invoice: &NewMirrorInvoice,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice>;

    async fn update_invoice(
        &self,
        invoice_id: &str,
        fields: &InvoiceFields,
    ) -> BillingResult<MirrorInvoice>;

    /// Finalize without auto-advancing into a charge attempt
    async fn finalize_invoice(
        &self,
        invoice_id: &str,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice>;

    /// Record the invoice as paid through an external channel
    async fn pay_invoice_out_of_band(
        &self,
        invoice_id: &str,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice>;

    /// Retrieve a price with its product expanded
    async fn retrieve_price(&self, price_id: &str) -> BillingResult<Price>;

    /// Retrieve a payment intent with its latest charge expanded
    async fn retrieve_payment_intent(&self, intent_id: &str) -> BillingResult<PaymentIntent>;

    async fn create_payment_intent(
        &self,
        intent: &NewPaymentIntent,
        key: &IdempotencyKey,
    ) -> BillingResult<PaymentIntent>;
}

/// Stripe-backed gateway
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Walk a Stripe list endpoint until `has_more` is false
    async fn list_all<T>(&self, path: &str, query: ListQuery<'_>) -> BillingResult<Vec<T>>
    where
        T: DeserializeOwned + Identified + Send + 'static,
    {
        let mut query = query.page_size();
        let mut out = Vec::new();
        loop {
            let page: ListPage<T> = self.stripe.inner().get_query(path, &query).await?;
            let next = page.data.last().map(|item| item.id().to_string());
            out.extend(page.data);
            match next {
                Some(last_id) if page.has_more => query.starting_after = Some(last_id),
                _ => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ProviderGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> BillingResult<CheckoutSession> {
        let utm = params.utm.to_metadata();
        let form = CreateSessionForm {
            payment_method_types: ["card"],
            line_items: [SessionLineItemForm {
                price: &params.price_id,
                quantity: params.quantity,
            }],
            mode: "payment",
            customer_creation: "always",
            customer_email: params.customer_email.as_deref(),
            phone_number_collection: EnabledForm { enabled: true },
            billing_address_collection: "required",
            success_url: &params.success_url,
            cancel_url: &params.cancel_url,
            metadata: &utm,
            payment_intent_data: PaymentIntentDataForm {
                metadata: &utm,
                setup_future_usage: "off_session",
            },
            expand: ["line_items"],
        };

        let session: WireSession = self
            .stripe
            .inner()
            .post_form("/checkout/sessions", &form)
            .await?;

        let line_items = session
            .line_items
            .as_ref()
            .map(|page| page.data.iter().map(map_line_item).collect())
            .unwrap_or_default();

        Ok(map_session(session, line_items))
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> BillingResult<CheckoutSession> {
        let session: WireSession = self
            .stripe
            .inner()
            .get_query(
                &format!("/checkout/sessions/{}", session_id),
                &ExpandQuery {
                    expand: &["payment_intent"],
                },
            )
            .await?;

        let line_items: Vec<WireLineItem> = self
            .list_all(
                &format!("/checkout/sessions/{}/line_items", session_id),
                ListQuery {
                    expand: &["data.price.product"],
                    ..ListQuery::default()
                },
            )
            .await?;

        let line_items = line_items.iter().map(map_line_item).collect();
        Ok(map_session(session, line_items))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Customer> {
        let id = parse_customer_id(customer_id)?;
        let customer = stripe::Customer::retrieve(self.stripe.inner(), &id, &[]).await?;

        let default_payment_method = customer
            .invoice_settings
            .and_then(|settings| settings.default_payment_method)
            .map(|pm| pm.id().to_string());

        Ok(Customer {
            id: customer.id.to_string(),
            name: customer.name,
            email: customer.email,
            phone: customer.phone,
            default_payment_method,
        })
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        update: &CustomerUpdate,
    ) -> BillingResult<()> {
        let id = parse_customer_id(customer_id)?;

        let mut params = UpdateCustomer::default();
        params.metadata = Some(update.metadata.clone());
        params.name = update.name.as_deref();
        params.phone = update.phone.as_deref();

        stripe::Customer::update(self.stripe.inner(), &id, params).await?;
        Ok(())
    }

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<MirrorInvoice>> {
        let invoices: Vec<WireInvoice> = self
            .list_all(
                "/invoices",
                ListQuery {
                    customer: Some(customer_id),
                    ..ListQuery::default()
                },
            )
            .await?;

        invoices.into_iter().map(map_invoice).collect()
    }

    async fn list_pending_invoice_items(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<MirrorInvoiceItem>> {
        let items: Vec<WireInvoiceItem> = self
            .list_all(
                "/invoiceitems",
                ListQuery {
                    customer: Some(customer_id),
                    pending: Some(true),
                    ..ListQuery::default()
                },
            )
            .await?;

        Ok(items.into_iter().map(map_invoice_item).collect())
    }

    async fn list_invoice_items(&self, invoice_id: &str) -> BillingResult<Vec<MirrorInvoiceItem>> {
        let items: Vec<WireInvoiceItem> = self
            .list_all(
                "/invoiceitems",
                ListQuery {
                    invoice: Some(invoice_id),
                    ..ListQuery::default()
                },
            )
            .await?;

        Ok(items.into_iter().map(map_invoice_item).collect())
    }

    async fn create_invoice_item(
        &self,
        item: &NewInvoiceItem,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoiceItem> {
        let form = CreateInvoiceItemForm {
            customer: &item.customer_id,
            amount: item.amount,
            currency: &item.currency,
            description: &item.description,
            metadata: &item.metadata,
            invoice: item.invoice_id.as_deref(),
        };

        let created: WireInvoiceItem = self
            .stripe
            .idempotent(key)
            .post_form("/invoiceitems", &form)
            .await?;

        Ok(map_invoice_item(created))
    }

    async fn delete_invoice_item(&self, item_id: &str) -> BillingResult<()> {
        let _: DeletedObject = self
            .stripe
            .inner()
            .delete(&format!("/invoiceitems/{}", item_id))
            .await?;
        Ok(())
    }

    async fn create_invoice(
        &self,
        invoice: &NewMirrorInvoice,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice> {
        let form = CreateInvoiceForm {
            customer: &invoice.customer_id,
            currency: &invoice.currency,
            collection_method: "send_invoice",
            days_until_due: invoice.fields.days_until_due,
            pending_invoice_items_behavior: "include",
            auto_advance: false,
            description: &invoice.fields.description,
            footer: &invoice.fields.footer,
            metadata: &invoice.metadata,
        };

        let created: WireInvoice = self
            .stripe
            .idempotent(key)
            .post_form("/invoices", &form)
            .await?;

        map_invoice(created)
    }

    async fn update_invoice(
        &self,
        invoice_id: &str,
        fields: &InvoiceFields,
    ) -> BillingResult<MirrorInvoice> {
        let form = UpdateInvoiceForm {
            collection_method: "send_invoice",
            days_until_due: fields.days_until_due,
            description: &fields.description,
            footer: &fields.footer,
        };

        let updated: WireInvoice = self
            .stripe
            .inner()
            .post_form(&format!("/invoices/{}", invoice_id), &form)
            .await?;

        map_invoice(updated)
    }

    async fn finalize_invoice(
        &self,
        invoice_id: &str,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice> {
        let finalized: WireInvoice = self
            .stripe
            .idempotent(key)
            .post_form(
                &format!("/invoices/{}/finalize", invoice_id),
                &FinalizeInvoiceForm {
                    auto_advance: false,
                },
            )
            .await?;

        map_invoice(finalized)
    }

    async fn pay_invoice_out_of_band(
        &self,
        invoice_id: &str,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice> {
        let paid: WireInvoice = self
            .stripe
            .idempotent(key)
            .post_form(
                &format!("/invoices/{}/pay", invoice_id),
                &PayInvoiceForm {
                    paid_out_of_band: true,
                },
            )
            .await?;

        map_invoice(paid)
    }

    async fn retrieve_price(&self, price_id: &str) -> BillingResult<Price> {
        let price: WirePrice = self
            .stripe
            .inner()
            .get_query(
                &format!("/prices/{}", price_id),
                &ExpandQuery {
                    expand: &["product"],
                },
            )
            .await?;

        Ok(map_price(price))
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> BillingResult<PaymentIntent> {
        let intent: WirePaymentIntent = self
            .stripe
            .inner()
            .get_query(
                &format!("/payment_intents/{}", intent_id),
                &ExpandQuery {
                    expand: &["latest_charge"],
                },
            )
            .await?;

        Ok(map_payment_intent(intent))
    }

    async fn create_payment_intent(
        &self,
        intent: &NewPaymentIntent,
        key: &IdempotencyKey,
    ) -> BillingResult<PaymentIntent> {
        let form = CreatePaymentIntentForm {
            amount: intent.amount,
            currency: &intent.currency,
            customer: &intent.customer_id,
            payment_method: &intent.payment_method_id,
            confirmation_method: "automatic",
            metadata: &intent.metadata,
            payment_method_options: PaymentMethodOptionsForm {
                card: CardOptionsForm {
                    request_three_d_secure: "any",
                },
            },
        };

        let created: WirePaymentIntent = self
            .stripe
            .idempotent(key)
            .post_form("/payment_intents", &form)
            .await?;

        Ok(map_payment_intent(created))
    }
}

fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
    customer_id
        .parse::<CustomerId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

// ============================================================================
// Request forms
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
struct ListQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    starting_after: Option<String>,
    #[serde(skip_serializing_if = "no_expansions")]
    expand: &'a [&'a str],
}

fn no_expansions(expand: &&[&str]) -> bool {
    expand.is_empty()
}

impl ListQuery<'_> {
    fn page_size(mut self) -> Self {
        self.limit = Some(PAGE_SIZE);
        self
    }
}

#[derive(Debug, Serialize)]
struct ExpandQuery<'a> {
    expand: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct SessionLineItemForm<'a> {
    price: &'a str,
    quantity: u64,
}

#[derive(Debug, Serialize)]
struct EnabledForm {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct PaymentIntentDataForm<'a> {
    metadata: &'a HashMap<String, String>,
    setup_future_usage: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateSessionForm<'a> {
    payment_method_types: [&'a str; 1],
    line_items: [SessionLineItemForm<'a>; 1],
    mode: &'a str,
    customer_creation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
    phone_number_collection: EnabledForm,
    billing_address_collection: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
    metadata: &'a HashMap<String, String>,
    payment_intent_data: PaymentIntentDataForm<'a>,
    expand: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct CreateInvoiceItemForm<'a> {
    customer: &'a str,
    amount: i64,
    currency: &'a str,
    description: &'a str,
    metadata: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoice: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceForm<'a> {
    customer: &'a str,
    currency: &'a str,
    collection_method: &'a str,
    days_until_due: u32,
    pending_invoice_items_behavior: &'a str,
    auto_advance: bool,
    description: &'a str,
    footer: &'a str,
    metadata: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct UpdateInvoiceForm<'a> {
    collection_method: &'a str,
    days_until_due: u32,
    description: &'a str,
    footer: &'a str,
}

#[derive(Debug, Serialize)]
struct FinalizeInvoiceForm {
    auto_advance: bool,
}

#[derive(Debug, Serialize)]
struct PayInvoiceForm {
    paid_out_of_band: bool,
}

#[derive(Debug, Serialize)]
struct CardOptionsForm<'a> {
    request_three_d_secure: &'a str,
}

#[derive(Debug, Serialize)]
struct PaymentMethodOptionsForm<'a> {
    card: CardOptionsForm<'a>,
}

#[derive(Debug, Serialize)]
struct CreatePaymentIntentForm<'a> {
    amount: i64,
    currency: &'a str,
    customer: &'a str,
    payment_method: &'a str,
    confirmation_method: &'a str,
    metadata: &'a HashMap<String, String>,
    payment_method_options: PaymentMethodOptionsForm<'a>,
}

// ============================================================================
// Wire records
// ============================================================================

trait Identified {
    fn id(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct DeletedObject {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

/// A field Stripe returns either as a bare id or as the expanded object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdOrObject<T> {
    Id(String),
    Object(T),
}

impl<T: Identified> IdOrObject<T> {
    fn id(&self) -> &str {
        match self {
            IdOrObject::Id(id) => id,
            IdOrObject::Object(obj) => obj.id(),
        }
    }

    fn object(&self) -> Option<&T> {
        match self {
            IdOrObject::Id(_) => None,
            IdOrObject::Object(obj) => Some(obj),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireCustomerDetails {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireIntentRef {
    id: String,
    payment_method: Option<IdOrObject<IdOnly>>,
}

#[derive(Debug, Deserialize)]
struct WireSession {
    id: String,
    url: Option<String>,
    currency: Option<String>,
    amount_total: Option<i64>,
    customer: Option<IdOrObject<IdOnly>>,
    customer_details: Option<WireCustomerDetails>,
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    created: i64,
    payment_intent: Option<IdOrObject<WireIntentRef>>,
    line_items: Option<ListPage<WireLineItem>>,
}

#[derive(Debug, Deserialize)]
struct WireProduct {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePrice {
    id: String,
    nickname: Option<String>,
    unit_amount: Option<i64>,
    currency: String,
    product: Option<IdOrObject<WireProduct>>,
}

#[derive(Debug, Deserialize)]
struct WireLineItem {
    id: String,
    description: Option<String>,
    quantity: Option<u64>,
    amount_subtotal: Option<i64>,
    amount_total: Option<i64>,
    currency: Option<String>,
    price: Option<WirePrice>,
}

#[derive(Debug, Deserialize)]
struct WireInvoice {
    id: String,
    customer: Option<IdOrObject<IdOnly>>,
    currency: Option<String>,
    status: Option<String>,
    metadata: Option<HashMap<String, String>>,
    collection_method: Option<String>,
    due_date: Option<i64>,
    footer: Option<String>,
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    amount_paid: i64,
    hosted_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireInvoiceItem {
    id: String,
    customer: Option<IdOrObject<IdOnly>>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
    description: Option<String>,
    metadata: Option<HashMap<String, String>>,
    invoice: Option<IdOrObject<IdOnly>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireBillingDetails {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCharge {
    id: String,
    billing_details: Option<WireBillingDetails>,
}

#[derive(Debug, Deserialize)]
struct WirePaymentIntent {
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
    customer: Option<IdOrObject<IdOnly>>,
    payment_method: Option<IdOrObject<IdOnly>>,
    metadata: Option<HashMap<String, String>>,
    client_secret: Option<String>,
    #[serde(default)]
    created: i64,
    charges: Option<ListPage<WireCharge>>,
    latest_charge: Option<IdOrObject<WireCharge>>,
}

impl Identified for IdOnly {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WireIntentRef {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WireProduct {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WireLineItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WireInvoice {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WireInvoiceItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WireCharge {
    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================================================
// Mapping
// ============================================================================

fn map_session(session: WireSession, line_items: Vec<LineItem>) -> CheckoutSession {
    let details = session.customer_details.unwrap_or_default();
    let payment_method_id = session
        .payment_intent
        .as_ref()
        .and_then(IdOrObject::object)
        .and_then(|pi| pi.payment_method.as_ref())
        .map(|pm| pm.id().to_string());

    CheckoutSession {
        id: session.id,
        url: session.url,
        currency: session.currency,
        amount_total: session.amount_total,
        customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
        customer_details: CustomerDetails {
            name: details.name,
            email: details.email,
            phone: details.phone,
        },
        metadata: session.metadata.unwrap_or_default(),
        line_items,
        created: session.created,
        payment_method_id,
    }
}

fn map_line_item(item: &WireLineItem) -> LineItem {
    let price = item.price.as_ref();
    LineItem {
        id: item.id.clone(),
        price_id: price.map(|p| p.id.clone()).unwrap_or_default(),
        price_nickname: price.and_then(|p| p.nickname.clone()),
        product_name: price
            .and_then(|p| p.product.as_ref())
            .and_then(IdOrObject::object)
            .and_then(|product| product.name.clone()),
        description: item.description.clone(),
        quantity: item.quantity.unwrap_or(1),
        unit_amount: price.and_then(|p| p.unit_amount),
        amount_subtotal: item.amount_subtotal,
        amount_total: item.amount_total,
        currency: item
            .currency
            .clone()
            .or_else(|| price.map(|p| p.currency.clone())),
    }
}

fn map_invoice(invoice: WireInvoice) -> BillingResult<MirrorInvoice> {
    let raw_status = invoice.status.unwrap_or_default();
    let status = InvoiceStatus::from_provider(&raw_status).ok_or_else(|| {
        BillingError::StripeApi(format!(
            "Invoice {} has unexpected status '{}'",
            invoice.id, raw_status
        ))
    })?;

    Ok(MirrorInvoice {
        customer_id: invoice
            .customer
            .as_ref()
            .map(|c| c.id().to_string())
            .unwrap_or_default(),
        id: invoice.id,
        currency: invoice.currency,
        status,
        metadata: invoice.metadata.unwrap_or_default(),
        collection_method: invoice.collection_method,
        due_date: invoice.due_date,
        footer: invoice.footer,
        amount_due: invoice.amount_due,
        amount_paid: invoice.amount_paid,
        hosted_invoice_url: invoice.hosted_invoice_url,
    })
}

fn map_invoice_item(item: WireInvoiceItem) -> MirrorInvoiceItem {
    MirrorInvoiceItem {
        customer_id: item
            .customer
            .as_ref()
            .map(|c| c.id().to_string())
            .unwrap_or_default(),
        invoice_id: item.invoice.as_ref().map(|i| i.id().to_string()),
        id: item.id,
        amount: item.amount,
        currency: item.currency,
        description: item.description,
        metadata: item.metadata.unwrap_or_default(),
    }
}

fn map_price(price: WirePrice) -> Price {
    let product = price.product.map(|product| match product {
        IdOrObject::Id(id) => ProductRef { id, name: None },
        IdOrObject::Object(obj) => ProductRef {
            id: obj.id,
            name: obj.name,
        },
    });

    Price {
        id: price.id,
        nickname: price.nickname,
        unit_amount: price.unit_amount,
        currency: price.currency,
        product,
    }
}

fn map_charge(charge: &WireCharge) -> Charge {
    let details = charge.billing_details.as_ref();
    Charge {
        id: charge.id.clone(),
        billing_details: BillingDetails {
            name: details.and_then(|d| d.name.clone()),
            email: details.and_then(|d| d.email.clone()),
            phone: details.and_then(|d| d.phone.clone()),
        },
    }
}

fn map_payment_intent(intent: WirePaymentIntent) -> PaymentIntent {
    PaymentIntent {
        customer_id: intent.customer.as_ref().map(|c| c.id().to_string()),
        payment_method_id: intent.payment_method.as_ref().map(|pm| pm.id().to_string()),
        charges: intent
            .charges
            .as_ref()
            .map(|page| page.data.iter().map(map_charge).collect())
            .unwrap_or_default(),
        latest_charge: intent
            .latest_charge
            .as_ref()
            .and_then(IdOrObject::object)
            .map(map_charge),
        id: intent.id,
        amount: intent.amount,
        currency: intent.currency,
        metadata: intent.metadata.unwrap_or_default(),
        client_secret: intent.client_secret,
        created: intent.created,
    }
}
