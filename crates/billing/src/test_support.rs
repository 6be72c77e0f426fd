//! In-memory provider and recording sinks for unit tests
//!
//! `MockGateway` behaves like the Stripe objects the funnel touches: invoice
//! creation sweeps the customer's pending items, finalize/pay enforce status
//! transitions, and any request carrying an idempotency key already seen
//! replays the stored response. Every gateway method yields to the scheduler
//! first so that concurrent reconciliations interleave between calls.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::attribution::{ConversionDispatcher, ConversionEvent};
use crate::error::{BillingError, BillingResult};
use crate::gateway::ProviderGateway;
use crate::idempotency::IdempotencyKey;
use crate::orders::{OrderReport, OrderReporter};
use crate::types::{
    CheckoutSession, Customer, CustomerDetails, CustomerUpdate, InvoiceFields, InvoiceStatus,
    LineItem, MirrorInvoice, MirrorInvoiceItem, NewCheckoutSession, NewInvoiceItem,
    NewMirrorInvoice, NewPaymentIntent, PaymentIntent, Price, ProductRef,
};

#[derive(Debug, Clone)]
enum Replayed {
    Item(MirrorInvoiceItem),
    Invoice(MirrorInvoice),
    Intent(PaymentIntent),
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, CheckoutSession>,
    customers: HashMap<String, Customer>,
    customer_updates: Vec<(String, CustomerUpdate)>,
    invoices: Vec<MirrorInvoice>,
    items: Vec<MirrorInvoiceItem>,
    prices: HashMap<String, Price>,
    intents: HashMap<String, PaymentIntent>,
    replays: HashMap<String, Replayed>,
    calls: Vec<&'static str>,
    faults: HashMap<&'static str, usize>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    /// Record the call and consume a pending injected fault for it
    fn enter(&mut self, op: &'static str) -> BillingResult<()> {
        self.calls.push(op);
        if let Some(remaining) = self.faults.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BillingError::StripeApi(format!("injected failure in {}", op)));
            }
        }
        Ok(())
    }

    fn invoice_mut(&mut self, invoice_id: &str) -> BillingResult<&mut MirrorInvoice> {
        self.invoices
            .iter_mut()
            .find(|inv| inv.id == invoice_id)
            .ok_or_else(|| BillingError::StripeApi(format!("No such invoice: '{}'", invoice_id)))
    }

    fn recompute_amount_due(&mut self, invoice_id: &str) {
        let total: i64 = self
            .items
            .iter()
            .filter(|item| item.invoice_id.as_deref() == Some(invoice_id))
            .map(|item| item.amount)
            .sum();
        if let Some(invoice) = self.invoices.iter_mut().find(|inv| inv.id == invoice_id) {
            invoice.amount_due = total;
        }
    }
}

/// In-memory stand-in for the Stripe account
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn insert_session(&self, session: CheckoutSession) {
        self.lock().sessions.insert(session.id.clone(), session);
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.lock().customers.insert(customer.id.clone(), customer);
    }

    pub fn insert_price(&self, price: Price) {
        self.lock().prices.insert(price.id.clone(), price);
    }

    pub fn insert_intent(&self, intent: PaymentIntent) {
        self.lock().intents.insert(intent.id.clone(), intent);
    }

    /// Insert an invoice item as if left behind by an earlier run
    pub fn insert_item(&self, item: MirrorInvoiceItem) {
        self.lock().items.push(item);
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.lock().faults.insert(op, times);
    }

    pub fn set_invoice_status(&self, invoice_id: &str, status: InvoiceStatus) {
        let mut state = self.lock();
        if let Ok(invoice) = state.invoice_mut(invoice_id) {
            invoice.status = status;
        }
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Number of calls that mutate provider state
    pub fn mutation_count(&self) -> usize {
        const MUTATIONS: [&str; 8] = [
            "update_customer",
            "create_invoice_item",
            "delete_invoice_item",
            "create_invoice",
            "update_invoice",
            "finalize_invoice",
            "pay_invoice_out_of_band",
            "create_payment_intent",
        ];
        self.lock()
            .calls
            .iter()
            .filter(|c| MUTATIONS.contains(c))
            .count()
    }

    pub fn invoices(&self) -> Vec<MirrorInvoice> {
        self.lock().invoices.clone()
    }

    pub fn items(&self) -> Vec<MirrorInvoiceItem> {
        self.lock().items.clone()
    }

    pub fn items_on(&self, invoice_id: &str) -> Vec<MirrorInvoiceItem> {
        self.lock()
            .items
            .iter()
            .filter(|item| item.invoice_id.as_deref() == Some(invoice_id))
            .cloned()
            .collect()
    }

    pub fn invoices_for_session(&self, session_id: &str) -> Vec<MirrorInvoice> {
        self.lock()
            .invoices
            .iter()
            .filter(|inv| inv.parent_session_id() == Some(session_id))
            .cloned()
            .collect()
    }

    pub fn customer_updates(&self) -> Vec<(String, CustomerUpdate)> {
        self.lock().customer_updates.clone()
    }

    pub fn payment_intents(&self) -> Vec<PaymentIntent> {
        self.lock().intents.values().cloned().collect()
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> BillingResult<CheckoutSession> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("create_checkout_session")?;

        let price = state
            .prices
            .get(&params.price_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such price: '{}'", params.price_id)))?;
        let id = state.next_id("cs");
        let quantity = i64::try_from(params.quantity).unwrap();
        let amount = price.unit_amount.unwrap_or(0) * quantity;

        let session = CheckoutSession {
            url: Some(format!("https://checkout.stripe.com/c/pay/{}", id)),
            currency: Some(price.currency.clone()),
            amount_total: Some(amount),
            customer_details: CustomerDetails {
                email: params.customer_email.clone(),
                ..Default::default()
            },
            metadata: params.utm.to_metadata(),
            line_items: vec![LineItem {
                id: state.next_id("li"),
                price_id: price.id.clone(),
                price_nickname: price.nickname.clone(),
                product_name: price.product.as_ref().and_then(|p| p.name.clone()),
                quantity: params.quantity,
                unit_amount: price.unit_amount,
                amount_subtotal: Some(amount),
                amount_total: Some(amount),
                currency: Some(price.currency.clone()),
                ..Default::default()
            }],
            created: 1_700_000_000,
            id: id.clone(),
            ..Default::default()
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> BillingResult<CheckoutSession> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("retrieve_checkout_session")?;
        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such checkout.session: '{}'", session_id)))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Customer> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("retrieve_customer")?;
        state
            .customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such customer: '{}'", customer_id)))
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        update: &CustomerUpdate,
    ) -> BillingResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("update_customer")?;
        state
            .customer_updates
            .push((customer_id.to_string(), update.clone()));
        Ok(())
    }

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<MirrorInvoice>> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("list_invoices")?;
        Ok(state
            .invoices
            .iter()
            .filter(|inv| inv.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn list_pending_invoice_items(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<MirrorInvoiceItem>> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("list_pending_invoice_items")?;
        Ok(state
            .items
            .iter()
            .filter(|item| item.customer_id == customer_id && item.is_pending())
            .cloned()
            .collect())
    }

    async fn list_invoice_items(&self, invoice_id: &str) -> BillingResult<Vec<MirrorInvoiceItem>> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("list_invoice_items")?;
        Ok(state
            .items
            .iter()
            .filter(|item| item.invoice_id.as_deref() == Some(invoice_id))
            .cloned()
            .collect())
    }

    async fn create_invoice_item(
        &self,
        item: &NewInvoiceItem,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoiceItem> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("create_invoice_item")?;
        if let Some(Replayed::Item(stored)) = state.replays.get(key.as_str()) {
            return Ok(stored.clone());
        }

        if let Some(invoice_id) = &item.invoice_id {
            let invoice = state.invoice_mut(invoice_id)?;
            if invoice.status != InvoiceStatus::Draft {
                return Err(BillingError::StripeApi(format!(
                    "Invoice {} is no longer a draft",
                    invoice_id
                )));
            }
        }

        let created = MirrorInvoiceItem {
            id: state.next_id("ii"),
            customer_id: item.customer_id.clone(),
            amount: item.amount,
            currency: item.currency.clone(),
            description: Some(item.description.clone()),
            metadata: item.metadata.clone(),
            invoice_id: item.invoice_id.clone(),
        };
        state.items.push(created.clone());
        if let Some(invoice_id) = &item.invoice_id {
            state.recompute_amount_due(invoice_id);
        }
        state
            .replays
            .insert(key.as_str().to_string(), Replayed::Item(created.clone()));
        Ok(created)
    }

    async fn delete_invoice_item(&self, item_id: &str) -> BillingResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("delete_invoice_item")?;

        let position = state
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| BillingError::StripeApi(format!("No such invoiceitem: '{}'", item_id)))?;

        let invoice_id = state.items[position].invoice_id.clone();
        if let Some(invoice_id) = &invoice_id {
            if state.invoice_mut(invoice_id)?.status != InvoiceStatus::Draft {
                return Err(BillingError::StripeApi(format!(
                    "Invoice item {} belongs to a finalized invoice",
                    item_id
                )));
            }
        }

        state.items.remove(position);
        if let Some(invoice_id) = &invoice_id {
            state.recompute_amount_due(invoice_id);
        }
        Ok(())
    }

    async fn create_invoice(
        &self,
        invoice: &NewMirrorInvoice,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("create_invoice")?;
        if let Some(Replayed::Invoice(stored)) = state.replays.get(key.as_str()) {
            return Ok(stored.clone());
        }

        let id = state.next_id("in");
        for item in state.items.iter_mut() {
            if item.customer_id == invoice.customer_id && item.is_pending() {
                item.invoice_id = Some(id.clone());
            }
        }

        state.invoices.push(MirrorInvoice {
            id: id.clone(),
            customer_id: invoice.customer_id.clone(),
            currency: Some(invoice.currency.clone()),
            status: InvoiceStatus::Draft,
            metadata: invoice.metadata.clone(),
            collection_method: Some("send_invoice".to_string()),
            due_date: Some(1_700_000_000 + i64::from(invoice.fields.days_until_due) * 86_400),
            footer: Some(invoice.fields.footer.clone()),
            amount_due: 0,
            amount_paid: 0,
            hosted_invoice_url: None,
        });
        state.recompute_amount_due(&id);

        let created = state.invoice_mut(&id)?.clone();
        state
            .replays
            .insert(key.as_str().to_string(), Replayed::Invoice(created.clone()));
        Ok(created)
    }

    async fn update_invoice(
        &self,
        invoice_id: &str,
        fields: &InvoiceFields,
    ) -> BillingResult<MirrorInvoice> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("update_invoice")?;
        let invoice = state.invoice_mut(invoice_id)?;
        invoice.collection_method = Some("send_invoice".to_string());
        invoice.footer = Some(fields.footer.clone());
        Ok(invoice.clone())
    }

    async fn finalize_invoice(
        &self,
        invoice_id: &str,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("finalize_invoice")?;
        if let Some(Replayed::Invoice(stored)) = state.replays.get(key.as_str()) {
            return Ok(stored.clone());
        }

        let invoice = state.invoice_mut(invoice_id)?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(BillingError::StripeApi(format!(
                "Invoice {} is already finalized",
                invoice_id
            )));
        }
        invoice.status = InvoiceStatus::Finalized;
        let finalized = invoice.clone();
        state
            .replays
            .insert(key.as_str().to_string(), Replayed::Invoice(finalized.clone()));
        Ok(finalized)
    }

    async fn pay_invoice_out_of_band(
        &self,
        invoice_id: &str,
        key: &IdempotencyKey,
    ) -> BillingResult<MirrorInvoice> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("pay_invoice_out_of_band")?;
        if let Some(Replayed::Invoice(stored)) = state.replays.get(key.as_str()) {
            return Ok(stored.clone());
        }

        let invoice = state.invoice_mut(invoice_id)?;
        if invoice.status != InvoiceStatus::Finalized {
            return Err(BillingError::StripeApi(format!(
                "Invoice {} cannot be paid from status {}",
                invoice_id, invoice.status
            )));
        }
        invoice.status = InvoiceStatus::Paid;
        invoice.amount_paid = invoice.amount_due;
        let paid = invoice.clone();
        state
            .replays
            .insert(key.as_str().to_string(), Replayed::Invoice(paid.clone()));
        Ok(paid)
    }

    async fn retrieve_price(&self, price_id: &str) -> BillingResult<Price> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("retrieve_price")?;
        state
            .prices
            .get(price_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such price: '{}'", price_id)))
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> BillingResult<PaymentIntent> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("retrieve_payment_intent")?;
        state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such payment_intent: '{}'", intent_id)))
    }

    async fn create_payment_intent(
        &self,
        intent: &NewPaymentIntent,
        key: &IdempotencyKey,
    ) -> BillingResult<PaymentIntent> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.enter("create_payment_intent")?;
        if let Some(Replayed::Intent(stored)) = state.replays.get(key.as_str()) {
            return Ok(stored.clone());
        }

        let id = state.next_id("pi");
        let created = PaymentIntent {
            client_secret: Some(format!("{}_secret_test", id)),
            id: id.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
            customer_id: Some(intent.customer_id.clone()),
            payment_method_id: Some(intent.payment_method_id.clone()),
            metadata: intent.metadata.clone(),
            created: 1_700_000_000,
            ..Default::default()
        };
        state.intents.insert(id, created.clone());
        state
            .replays
            .insert(key.as_str().to_string(), Replayed::Intent(created.clone()));
        Ok(created)
    }
}

/// Conversion sink that records every event it receives
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<ConversionEvent>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<ConversionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &ConversionEvent) -> bool {
        self.events.lock().unwrap().push(event.clone());
        true
    }
}

/// Order sink that records every report it receives
#[derive(Default)]
pub struct RecordingReporter {
    orders: Mutex<Vec<OrderReport>>,
}

impl RecordingReporter {
    pub fn orders(&self) -> Vec<OrderReport> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderReporter for RecordingReporter {
    async fn report(&self, order: &OrderReport) -> bool {
        self.orders.lock().unwrap().push(order.clone());
        true
    }
}

/// Completed session `cs_1`: one line item of price `p_1`, quantity 2,
/// subtotal 5000 usd, bought by customer `cus_1`
pub fn completed_session() -> CheckoutSession {
    session_for("cs_1", "cus_1", "li_1")
}

pub fn session_for(session_id: &str, customer_id: &str, line_item_id: &str) -> CheckoutSession {
    CheckoutSession {
        id: session_id.to_string(),
        url: Some(format!("https://checkout.stripe.com/c/pay/{}", session_id)),
        currency: Some("usd".to_string()),
        amount_total: Some(5000),
        customer_id: Some(customer_id.to_string()),
        customer_details: CustomerDetails {
            name: Some("Ana Souza".to_string()),
            email: Some("Ana@Example.com".to_string()),
            phone: Some("+5511988887777".to_string()),
        },
        metadata: HashMap::from([
            ("utm_source".to_string(), "facebook".to_string()),
            ("utm_campaign".to_string(), "launch".to_string()),
        ]),
        line_items: vec![LineItem {
            id: line_item_id.to_string(),
            price_id: "p_1".to_string(),
            price_nickname: Some("Full plan".to_string()),
            product_name: Some("Iron Formula".to_string()),
            description: Some("Iron Formula".to_string()),
            quantity: 2,
            unit_amount: Some(2500),
            amount_subtotal: Some(5000),
            amount_total: None,
            currency: Some("usd".to_string()),
        }],
        created: 1_700_000_000,
        payment_method_id: Some("pm_card_1".to_string()),
    }
}

pub fn upsell_price() -> Price {
    Price {
        id: "price_up".to_string(),
        nickname: Some("One-time offer".to_string()),
        unit_amount: Some(1990),
        currency: "usd".to_string(),
        product: Some(ProductRef {
            id: "prod_up".to_string(),
            name: Some("Iron Bonus Pack".to_string()),
        }),
    }
}
