//! Billing error types

use duepay_shared::{ParseStatusError, PlanTier, ReminderChannel};
use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Payment provider unreachable, timed out, or answered with a failure
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Webhook signature did not match. Carries no detail on purpose.
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    /// Authentic but malformed webhook payload
    #[error("Invalid webhook event: {0}")]
    InvalidEvent(String),

    /// Persistence failure while recording a payment
    #[error("Payment reconciliation failed: {0}")]
    Reconcile(String),

    #[error("Client has no {} on file for {channel} reminders", .channel.contact_field())]
    MissingContact { channel: ReminderChannel },

    #[error("{message}")]
    QuotaExceeded {
        plan: PlanTier,
        limit: i64,
        message: String,
    },

    #[error("Feature '{feature}' is not available on the {} plan", .plan.display_name())]
    FeatureUnavailable { feature: String, plan: PlanTier },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invoice number collided too many times under concurrent creation
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the payment provider should retry a webhook that failed with this error
    ///
    /// Only transient failures qualify. Everything else is acknowledged so the
    /// provider does not redeliver indefinitely.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Gateway(_)
                | BillingError::Reconcile(_)
                | BillingError::Database(_)
                | BillingError::Internal(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<ParseStatusError> for BillingError {
    fn from(err: ParseStatusError) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::Gateway(format!("request timed out: {}", err))
        } else {
            BillingError::Gateway(err.to_string())
        }
    }
}
