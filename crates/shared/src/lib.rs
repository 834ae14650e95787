#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Duepay Shared Types
//!
//! Domain entities shared by the billing core and the API server, plus
//! database pool helpers.

pub mod db;
pub mod models;

pub use db::{create_pool, run_migrations};
pub use models::{
    Client, Invoice, InvoiceStatus, ParseStatusError, Payment, PlanTier, Reminder,
    ReminderChannel, ReminderStatus, Subscription, SubscriptionStatus, UsageTracking,
};
