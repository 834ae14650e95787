//! Gateway payload parsing
//!
//! Everything here runs after the signature check. Paystack metadata is
//! loosely typed: it may arrive as an object, as a JSON-encoded string, or as
//! an empty string, and keys appear in both snake and camel case.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{parse_gateway_timestamp, TransactionVerification};
use crate::error::{BillingError, BillingResult};

/// Webhook envelope: `{event, data}`
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WebhookEvent {
    /// Parse an already-verified raw body
    pub fn parse(raw_body: &[u8]) -> BillingResult<Self> {
        serde_json::from_slice(raw_body)
            .map_err(|e| BillingError::InvalidEvent(format!("unreadable webhook body: {}", e)))
    }
}

/// A confirmed charge, from either a webhook or a verification poll
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeEvent {
    pub reference: String,
    pub amount_minor: i64,
    pub paid_at: OffsetDateTime,
    /// `None` when the metadata carried no usable invoice id
    pub invoice_id: Option<Uuid>,
}

impl ChargeEvent {
    /// Build from the `data` object of a `charge.success` webhook
    ///
    /// Missing `paid_at` falls back to `received_at`.
    pub fn from_webhook_data(data: &Value, received_at: OffsetDateTime) -> BillingResult<Self> {
        let reference = data
            .get("reference")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BillingError::InvalidEvent("charge has no reference".to_string()))?;

        let amount_minor = data
            .get("amount")
            .and_then(amount_as_i64)
            .ok_or_else(|| BillingError::InvalidEvent("charge has no amount".to_string()))?;

        let paid_at = ["paid_at", "paidAt"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_str))
            .find_map(parse_gateway_timestamp)
            .unwrap_or(received_at);

        Ok(Self {
            reference: reference.to_string(),
            amount_minor,
            paid_at,
            invoice_id: data.get("metadata").and_then(invoice_id_from_metadata),
        })
    }

    /// Build from a successful verification result
    pub fn from_verification(tx: &TransactionVerification, received_at: OffsetDateTime) -> Self {
        Self {
            reference: tx.reference.clone(),
            amount_minor: tx.amount_minor,
            paid_at: tx.paid_at.unwrap_or(received_at),
            invoice_id: invoice_id_from_metadata(&tx.metadata),
        }
    }
}

fn amount_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalise metadata to an object, decoding JSON-in-a-string
fn metadata_object(metadata: &Value) -> Option<serde_json::Map<String, Value>> {
    match metadata {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// First non-empty string value among `keys`
pub fn metadata_field(metadata: &Value, keys: &[&str]) -> Option<String> {
    let map = metadata_object(metadata)?;
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
}

/// Invoice id attached when the charge was initialized
pub fn invoice_id_from_metadata(metadata: &Value) -> Option<Uuid> {
    metadata_field(metadata, &["invoice_id", "invoiceId"])
        .and_then(|raw| Uuid::parse_str(&raw).ok())
}

/// Owner id for subscription events, from the event or the customer metadata
pub fn owner_id_from_data(data: &Value) -> Option<Uuid> {
    let candidates = [
        data.get("metadata"),
        data.get("customer").and_then(|c| c.get("metadata")),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|m| metadata_field(m, &["owner_id", "ownerId", "user_id"]))
        .find_map(|raw| Uuid::parse_str(&raw).ok())
}
