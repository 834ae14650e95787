// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError::QuotaExceeded carries upgrade guidance
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Duepay Billing Module
//!
//! Invoicing core: Paystack payments, plan gating, and payment reminders.
//!
//! ## Features
//!
//! - **Gateway Client**: Initialize hosted checkouts and verify transactions
//! - **Webhooks**: HMAC-SHA512 verification of Paystack deliveries
//! - **Reconciliation**: Exactly-once payment recording keyed on the transaction reference
//! - **Invoice Numbering**: Per-owner daily sequences (`INV-YYYYMMDD-NNN`)
//! - **Plan Gating**: Static feature table and monthly invoice quotas
//! - **Usage Tracking**: Per-period counters for invoices, reminders and clients
//! - **Reminders**: Email (Resend) and SMS (Twilio) dispatch with a persisted log
//! - **Subscriptions**: Sync plan changes from subscription webhooks

pub mod client;
pub mod clients;
pub mod entitlement;
pub mod error;
pub mod event;
pub mod invoices;
pub mod notify;
pub mod numbering;
pub mod reconcile;
pub mod reminders;
pub mod store;
pub mod subscriptions;
pub mod usage;
pub mod verify;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Client
pub use client::{ChargeInitialization, PaystackClient, PaystackConfig, TransactionVerification};

// Clients
pub use clients::{ClientService, CreateClientInput};

// Entitlement
pub use entitlement::{
    can_create_invoice, has_feature, invoice_limit, usage_warning_level, Feature,
    InvoiceAllowance, PlanContext, UsageWarningLevel,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use event::{ChargeEvent, WebhookEvent};

// Invoices
pub use invoices::{CreateInvoiceInput, InvoiceService, PaymentLink};

// Notifications
pub use notify::{MessageTransport, Notifiers, OutboundMessage, ResendEmailTransport, TwilioSmsTransport};

// Numbering
pub use numbering::next_invoice_number;

// Reconciliation
pub use reconcile::{PaymentReconciler, ReconcileResult};

// Reminders
pub use reminders::{DispatchReport, ReminderDispatcher, SweepSummary};

// Store
pub use store::{BillingStore, PgBillingStore};
#[cfg(any(test, feature = "test-store"))]
pub use store::InMemoryBillingStore;

// Subscriptions
pub use subscriptions::{SubscriptionService, SubscriptionSync};

// Usage
pub use usage::BillingPeriod;

// Verification
pub use verify::{PaymentVerifier, VerificationOutcome};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome, SIGNATURE_HEADER};

use std::sync::Arc;

use sqlx::PgPool;

/// Currency used when neither the request nor `DEFAULT_CURRENCY` names one
pub const DEFAULT_CURRENCY: &str = "NGN";

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub store: Arc<dyn BillingStore>,
    pub gateway: PaystackClient,
    pub clients: ClientService,
    pub invoices: InvoiceService,
    pub reconciler: PaymentReconciler,
    pub verifier: PaymentVerifier,
    pub webhooks: WebhookHandler,
    pub subscriptions: SubscriptionService,
    pub reminders: ReminderDispatcher,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let gateway = PaystackClient::from_env()?;
        let notifiers = Notifiers::from_env()?;
        let currency = std::env::var("DEFAULT_CURRENCY")
            .ok()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Ok(Self::new(
            Arc::new(PgBillingStore::new(pool)),
            gateway,
            notifiers,
            currency,
        ))
    }

    /// Create a new billing service over an explicit store and providers
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: PaystackClient,
        notifiers: Notifiers,
        default_currency: impl Into<String>,
    ) -> Self {
        let reconciler = PaymentReconciler::new(store.clone());
        let subscriptions = SubscriptionService::new(store.clone());

        Self {
            clients: ClientService::new(store.clone()),
            invoices: InvoiceService::new(store.clone(), gateway.clone(), default_currency),
            verifier: PaymentVerifier::new(gateway.clone(), reconciler.clone()),
            webhooks: WebhookHandler::new(
                gateway.webhook_secret(),
                reconciler.clone(),
                subscriptions.clone(),
            ),
            reminders: ReminderDispatcher::new(store.clone(), notifiers),
            reconciler,
            subscriptions,
            gateway,
            store,
        }
    }

    /// Load the caller's plan context for one request
    pub async fn plan_context(
        &self,
        owner_id: uuid::Uuid,
        now: time::OffsetDateTime,
    ) -> BillingResult<PlanContext> {
        PlanContext::load(self.store.as_ref(), owner_id, now).await
    }
}
