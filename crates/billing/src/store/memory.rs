//! In-memory [`BillingStore`] for tests
//!
//! Enforces the same constraints as the Postgres schema: unique payment
//! reference, unique invoice number per owner, and the all-or-nothing
//! payment write.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use duepay_shared::{
    Client, Invoice, InvoiceStatus, Payment, Reminder, Subscription, UsageTracking,
};
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    BillingStore, NewClient, NewInvoice, NewReminder, PaymentRecord, PaymentWrite, UsageCounter,
};
use crate::error::{BillingError, BillingResult};

#[derive(Default)]
struct State {
    clients: Vec<Client>,
    invoices: Vec<Invoice>,
    payments: Vec<Payment>,
    reminders: Vec<Reminder>,
    subscriptions: HashMap<Uuid, Subscription>,
    usage: HashMap<(Uuid, OffsetDateTime), UsageTracking>,
    business_names: HashMap<Uuid, String>,
}

#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_business_name(&self, owner_id: Uuid, name: &str) {
        self.state
            .lock()
            .await
            .business_names
            .insert(owner_id, name.to_string());
    }

    /// Insert a fully-formed invoice, bypassing numbering
    pub async fn seed_invoice(&self, invoice: Invoice) {
        self.state.lock().await.invoices.push(invoice);
    }

    pub async fn seed_client(&self, client: Client) {
        self.state.lock().await.clients.push(client);
    }

    pub async fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        self.state
            .lock()
            .await
            .invoices
            .iter()
            .find(|i| i.id == invoice_id)
            .cloned()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }

    pub async fn reminder_count(&self) -> usize {
        self.state.lock().await.reminders.len()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn insert_client(&self, client: NewClient) -> BillingResult<Client> {
        let client = Client {
            id: Uuid::new_v4(),
            owner_id: client.owner_id,
            name: client.name,
            email: client.email,
            phone: client.phone,
            business_name: client.business_name,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().await.clients.push(client.clone());
        Ok(client)
    }

    async fn get_client(&self, owner_id: Uuid, client_id: Uuid) -> BillingResult<Option<Client>> {
        Ok(self
            .state
            .lock()
            .await
            .clients
            .iter()
            .find(|c| c.id == client_id && c.owner_id == owner_id)
            .cloned())
    }

    async fn business_name(&self, owner_id: Uuid) -> BillingResult<Option<String>> {
        Ok(self.state.lock().await.business_names.get(&owner_id).cloned())
    }

    async fn last_invoice_number(&self, owner_id: Uuid) -> BillingResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .await
            .invoices
            .iter()
            .rev()
            .find(|i| i.owner_id == owner_id)
            .map(|i| i.invoice_number.clone()))
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let mut state = self.state.lock().await;
        if state
            .invoices
            .iter()
            .any(|i| i.owner_id == invoice.owner_id && i.invoice_number == invoice.invoice_number)
        {
            return Err(BillingError::Conflict(format!(
                "invoice number {} already exists",
                invoice.invoice_number
            )));
        }
        let now = OffsetDateTime::now_utc();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            owner_id: invoice.owner_id,
            client_id: invoice.client_id,
            invoice_number: invoice.invoice_number,
            amount: invoice.amount,
            currency: invoice.currency,
            description: invoice.description,
            due_date: invoice.due_date,
            status: invoice.status,
            payment_reference: None,
            payment_link: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        state.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<Option<Invoice>> {
        Ok(self
            .state
            .lock()
            .await
            .invoices
            .iter()
            .find(|i| i.id == invoice_id && i.owner_id == owner_id)
            .cloned())
    }

    async fn get_invoice_by_id(&self, invoice_id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.invoice(invoice_id).await)
    }

    async fn set_payment_link(
        &self,
        invoice_id: Uuid,
        reference: &str,
        link: &str,
    ) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoices.iter_mut().find(|i| i.id == invoice_id) else {
            return Ok(false);
        };
        if !matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Sent)
            || invoice.payment_reference.is_some()
        {
            return Ok(false);
        }
        invoice.payment_reference = Some(reference.to_string());
        invoice.payment_link = Some(link.to_string());
        invoice.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn invoices_due_for_reminder(
        &self,
        due_by: Date,
        quiet_since: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut due: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(|i| i.status == InvoiceStatus::Sent && i.due_date <= due_by)
            .filter(|i| {
                !state
                    .reminders
                    .iter()
                    .any(|r| r.invoice_id == i.id && r.scheduled_at >= quiet_since)
            })
            .cloned()
            .collect();
        due.sort_by_key(|i| (i.due_date, i.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn find_payment_by_reference(&self, reference: &str) -> BillingResult<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .iter()
            .find(|p| p.reference == reference)
            .cloned())
    }

    async fn record_payment(&self, payment: PaymentRecord) -> BillingResult<PaymentWrite> {
        let mut state = self.state.lock().await;
        if state.payments.iter().any(|p| p.reference == payment.reference) {
            return Ok(PaymentWrite::Duplicate);
        }

        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|i| i.id == payment.invoice_id)
        else {
            return Ok(PaymentWrite::InvoiceNotPayable);
        };
        let payable = matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Sent);
        let reference_matches = invoice
            .payment_reference
            .as_deref()
            .map_or(true, |r| r == payment.reference);
        if !payable || !reference_matches {
            return Ok(PaymentWrite::InvoiceNotPayable);
        }

        let now = OffsetDateTime::now_utc();
        invoice.status = InvoiceStatus::Paid;
        invoice.paid_at = Some(payment.paid_at);
        invoice.payment_reference = Some(payment.reference.clone());
        invoice.updated_at = now;

        let row = Payment {
            id: Uuid::new_v4(),
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            reference: payment.reference,
            paid_at: payment.paid_at,
            created_at: now,
        };
        state.payments.push(row.clone());
        Ok(PaymentWrite::Recorded(row))
    }

    async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn insert_reminder(&self, reminder: NewReminder) -> BillingResult<Reminder> {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            invoice_id: reminder.invoice_id,
            channel: reminder.channel,
            scheduled_at: reminder.scheduled_at,
            sent_at: reminder.sent_at,
            status: reminder.status,
            message: reminder.message,
        };
        self.state.lock().await.reminders.push(reminder.clone());
        Ok(reminder)
    }

    async fn reminders_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Reminder>> {
        let mut reminders: Vec<Reminder> = self
            .state
            .lock()
            .await
            .reminders
            .iter()
            .filter(|r| r.invoice_id == invoice_id)
            .cloned()
            .collect();
        reminders.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(reminders)
    }

    async fn get_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.state.lock().await.subscriptions.get(&owner_id).cloned())
    }

    async fn find_subscription_by_code(&self, code: &str) -> BillingResult<Option<Subscription>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .values()
            .find(|s| s.subscription_code.as_deref() == Some(code))
            .cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.owner_id, subscription.clone());
        Ok(())
    }

    async fn get_or_create_usage(
        &self,
        owner_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<UsageTracking> {
        let mut state = self.state.lock().await;
        let usage = state
            .usage
            .entry((owner_id, period_start))
            .or_insert_with(|| UsageTracking {
                owner_id,
                period_start,
                period_end,
                invoices_created: 0,
                reminders_sent: 0,
                clients_added: 0,
            });
        Ok(usage.clone())
    }

    async fn increment_usage(
        &self,
        owner_id: Uuid,
        period_start: OffsetDateTime,
        counter: UsageCounter,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        if let Some(usage) = state.usage.get_mut(&(owner_id, period_start)) {
            match counter {
                UsageCounter::InvoicesCreated => usage.invoices_created += 1,
                UsageCounter::RemindersSent => usage.reminders_sent += 1,
                UsageCounter::ClientsAdded => usage.clients_added += 1,
            }
        }
        Ok(())
    }
}
