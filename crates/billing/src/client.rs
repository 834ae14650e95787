//! Paystack API client
//!
//! Thin wrapper over the two gateway calls the billing core needs:
//! initializing a hosted checkout and verifying a transaction by reference.

use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Paystack configuration
#[derive(Debug, Clone)]
pub struct PaystackConfig {
    /// Secret API key. Also the HMAC key for webhook signatures.
    pub secret_key: String,
    pub base_url: String,
    /// Where the hosted checkout sends the payer afterwards
    pub callback_url: Option<String>,
    pub timeout: Duration,
}

impl PaystackConfig {
    /// Load from `PAYSTACK_SECRET_KEY`, `PAYSTACK_BASE_URL`,
    /// `PAYSTACK_CALLBACK_URL` and `GATEWAY_TIMEOUT_SECS`
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("PAYSTACK_SECRET_KEY")
            .map_err(|_| BillingError::Config("PAYSTACK_SECRET_KEY not set".to_string()))?;
        if secret_key.trim().is_empty() {
            return Err(BillingError::Config(
                "PAYSTACK_SECRET_KEY is empty".to_string(),
            ));
        }

        let base_url =
            std::env::var("PAYSTACK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let callback_url = std::env::var("PAYSTACK_CALLBACK_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let timeout_secs = std::env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            secret_key,
            base_url,
            callback_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn new(secret_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            base_url: base_url.into(),
            callback_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Hosted checkout created for an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeInitialization {
    pub authorization_url: String,
    pub reference: String,
    pub access_code: String,
}

/// Gateway's view of a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionVerification {
    pub status: String,
    pub reference: String,
    pub amount_minor: i64,
    pub currency: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    /// Opaque metadata attached at initialization
    pub metadata: Value,
}

impl TransactionVerification {
    /// Only `"success"` means the charge completed
    pub fn is_successful(&self) -> bool {
        self.status == "success"
    }
}

/// Envelope every Paystack response uses
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    reference: String,
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, alias = "paidAt")]
    paid_at: Option<String>,
    #[serde(default)]
    metadata: Value,
}

/// Convert a major-unit amount to the gateway's smallest unit
///
/// Rounds half away from zero, so 10.005 becomes 1001.
pub fn to_minor_units(amount: Decimal) -> BillingResult<i64> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| BillingError::InvalidInput("amount is too large".to_string()))
}

/// Convert gateway minor units back to a two-decimal amount
pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, 2)
}

/// Parse a gateway timestamp such as `2024-01-10T00:00:00.000Z`
pub fn parse_gateway_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}

/// Paystack REST client
#[derive(Clone)]
pub struct PaystackClient {
    http: reqwest::Client,
    config: PaystackConfig,
}

impl PaystackClient {
    pub fn new(config: PaystackConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    pub fn config(&self) -> &PaystackConfig {
        &self.config
    }

    /// Secret used to verify inbound webhooks
    pub fn webhook_secret(&self) -> &str {
        &self.config.secret_key
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Create a hosted checkout for `amount` with the invoice id as metadata
    pub async fn initialize_charge(
        &self,
        amount: Decimal,
        payer_email: &str,
        invoice_id: Uuid,
        currency: &str,
    ) -> BillingResult<ChargeInitialization> {
        let amount_minor = to_minor_units(amount)?;

        let mut body = serde_json::json!({
            "email": payer_email,
            "amount": amount_minor,
            "currency": currency,
            "metadata": { "invoice_id": invoice_id.to_string() },
        });
        if let Some(callback_url) = &self.config.callback_url {
            body["callback_url"] = Value::String(callback_url.clone());
        }

        tracing::debug!(
            invoice_id = %invoice_id,
            amount_minor = amount_minor,
            currency = currency,
            "Initializing Paystack transaction"
        );

        let response = self
            .http
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await?;

        let data: InitializeData = read_envelope(response, "initialize").await?;

        tracing::info!(
            invoice_id = %invoice_id,
            reference = %data.reference,
            "Paystack transaction initialized"
        );

        Ok(ChargeInitialization {
            authorization_url: data.authorization_url,
            reference: data.reference,
            access_code: data.access_code,
        })
    }

    /// Ask the gateway for the current state of `reference`
    pub async fn verify_transaction(
        &self,
        reference: &str,
    ) -> BillingResult<TransactionVerification> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BillingError::InvalidInput(
                "reference is required".to_string(),
            ));
        }
        // Dot segments are dropped when building a path, leaving a different endpoint
        if matches!(reference, "." | "..") {
            return Err(BillingError::InvalidInput(format!(
                "invalid reference {:?}",
                reference
            )));
        }

        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| BillingError::Config(format!("invalid Paystack base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BillingError::Config("Paystack base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["transaction", "verify", reference]);

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let data: VerifyData = read_envelope(response, "verify").await?;

        Ok(TransactionVerification {
            paid_at: data.paid_at.as_deref().and_then(parse_gateway_timestamp),
            status: data.status,
            reference: data.reference,
            amount_minor: data.amount,
            currency: data.currency,
            metadata: data.metadata,
        })
    }
}

async fn read_envelope<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> BillingResult<T> {
    let status = response.status();
    let text = response.text().await?;

    let envelope: Option<Envelope<T>> = serde_json::from_str(&text).ok();
    match envelope {
        Some(Envelope {
            status: true,
            data: Some(data),
            ..
        }) if status.is_success() => Ok(data),
        Some(envelope) => {
            tracing::warn!(
                operation = operation,
                http_status = status.as_u16(),
                message = %envelope.message,
                "Paystack request rejected"
            );
            Err(BillingError::Gateway(format!(
                "{} failed ({}): {}",
                operation, status, envelope.message
            )))
        }
        None => {
            tracing::warn!(
                operation = operation,
                http_status = status.as_u16(),
                "Unreadable Paystack response"
            );
            Err(BillingError::Gateway(format!(
                "{} failed ({}): unreadable response",
                operation, status
            )))
        }
    }
}
