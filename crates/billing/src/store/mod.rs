//! Datastore access for the billing core
//!
//! The datastore is the only shared mutable resource. Correctness under
//! concurrent requests comes from its constraints (unique payment reference,
//! unique invoice number per owner, conditional updates), never from
//! in-process locks.

use async_trait::async_trait;
use duepay_shared::{
    Client, Invoice, InvoiceStatus, Payment, Reminder, ReminderChannel, ReminderStatus,
    Subscription, UsageTracking,
};
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

#[cfg(any(test, feature = "test-store"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-store"))]
pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

/// Fields for a new client
#[derive(Debug, Clone)]
pub struct NewClient {
    pub owner_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub business_name: Option<String>,
}

/// Fields for a new invoice
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub owner_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub due_date: Date,
    pub status: InvoiceStatus,
}

/// A confirmed charge to be written by the reconciler
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub invoice_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub paid_at: OffsetDateTime,
}

/// Result of the atomic mark-paid-and-insert-payment write
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentWrite {
    /// Invoice marked paid and payment row inserted
    Recorded(Payment),
    /// A payment with this reference already exists; nothing was written
    Duplicate,
    /// Invoice missing, not payable, or bound to a different reference;
    /// nothing was written
    InvoiceNotPayable,
}

/// Fields for a reminder row
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub invoice_id: Uuid,
    pub channel: ReminderChannel,
    pub scheduled_at: OffsetDateTime,
    pub sent_at: Option<OffsetDateTime>,
    pub status: ReminderStatus,
    pub message: String,
}

/// Usage counters that can be incremented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCounter {
    InvoicesCreated,
    RemindersSent,
    ClientsAdded,
}

impl UsageCounter {
    pub fn column(&self) -> &'static str {
        match self {
            UsageCounter::InvoicesCreated => "invoices_created",
            UsageCounter::RemindersSent => "reminders_sent",
            UsageCounter::ClientsAdded => "clients_added",
        }
    }
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Clients

    async fn insert_client(&self, client: NewClient) -> BillingResult<Client>;

    /// Client by id, only if owned by `owner_id`
    async fn get_client(&self, owner_id: Uuid, client_id: Uuid) -> BillingResult<Option<Client>>;

    /// Display name used as the sender in reminder messages
    async fn business_name(&self, owner_id: Uuid) -> BillingResult<Option<String>>;

    // Invoices

    /// Most recently issued invoice number for the owner
    async fn last_invoice_number(&self, owner_id: Uuid) -> BillingResult<Option<String>>;

    /// Insert an invoice. Fails with `BillingError::Conflict` when the owner
    /// already has an invoice with the same number.
    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice>;

    /// Invoice by id, only if owned by `owner_id`
    async fn get_invoice(&self, owner_id: Uuid, invoice_id: Uuid)
        -> BillingResult<Option<Invoice>>;

    /// Invoice by id regardless of owner, for gateway-driven flows
    async fn get_invoice_by_id(&self, invoice_id: Uuid) -> BillingResult<Option<Invoice>>;

    /// Record the outbound reference and hosted checkout link.
    /// Returns `false` when the invoice is no longer payable or already
    /// has a reference; an existing reference is never replaced.
    async fn set_payment_link(
        &self,
        invoice_id: Uuid,
        reference: &str,
        link: &str,
    ) -> BillingResult<bool>;

    /// Unpaid sent invoices due on or before `due_by` with no reminder
    /// scheduled since `quiet_since`
    async fn invoices_due_for_reminder(
        &self,
        due_by: Date,
        quiet_since: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<Invoice>>;

    // Payments

    async fn find_payment_by_reference(&self, reference: &str) -> BillingResult<Option<Payment>>;

    /// Atomically insert the payment (insert-or-ignore on reference) and mark
    /// the invoice paid. Both happen or neither does.
    async fn record_payment(&self, payment: PaymentRecord) -> BillingResult<PaymentWrite>;

    async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>>;

    // Reminders

    async fn insert_reminder(&self, reminder: NewReminder) -> BillingResult<Reminder>;

    async fn reminders_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Reminder>>;

    // Subscriptions

    async fn get_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>>;

    async fn find_subscription_by_code(&self, code: &str) -> BillingResult<Option<Subscription>>;

    /// Insert or replace the owner's single subscription row
    async fn upsert_subscription(&self, subscription: &Subscription) -> BillingResult<()>;

    // Usage

    /// Usage row for the period, created with zero counters if absent
    async fn get_or_create_usage(
        &self,
        owner_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<UsageTracking>;

    async fn increment_usage(
        &self,
        owner_id: Uuid,
        period_start: OffsetDateTime,
        counter: UsageCounter,
    ) -> BillingResult<()>;
}
