//! Paystack webhook handling
//!
//! Paystack signs every delivery with `x-paystack-signature`: the hex
//! HMAC-SHA512 of the raw request body keyed with the secret API key. The
//! signature is checked against the bytes exactly as received, before any
//! JSON parsing.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::event::{ChargeEvent, WebhookEvent};
use crate::reconcile::{PaymentReconciler, ReconcileResult};
use crate::subscriptions::{SubscriptionService, SubscriptionSync};

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Check `signature_header` against HMAC-SHA512(`secret`, `raw_body`)
///
/// Never errors: a malformed header, an empty secret or a mismatch all
/// return `false`. Comparison is constant-time.
pub fn verify_signature(raw_body: &[u8], signature_header: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(signature_header.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Hex signature for `raw_body`, as the gateway would send it
pub fn sign(raw_body: &[u8], secret: &str) -> BillingResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("invalid webhook secret".to_string()))?;
    mac.update(raw_body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// What handling a delivery did. Every variant is acknowledged with 2xx.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Payment(ReconcileResult),
    Subscription(SubscriptionSync),
    /// Authentic but not actionable: unknown event type, or a payload
    /// missing what the handler needs
    Ignored { event: String, reason: String },
}

/// Webhook handler for Paystack events
#[derive(Clone)]
pub struct WebhookHandler {
    secret: String,
    reconciler: PaymentReconciler,
    subscriptions: SubscriptionService,
}

impl WebhookHandler {
    pub fn new(
        secret: impl Into<String>,
        reconciler: PaymentReconciler,
        subscriptions: SubscriptionService,
    ) -> Self {
        Self {
            secret: secret.into(),
            reconciler,
            subscriptions,
        }
    }

    /// Verify and process one delivery
    ///
    /// Errors:
    /// - `SignatureInvalid` when the header is missing or wrong; nothing is read or written
    /// - `InvalidEvent` when the verified body is not a webhook envelope
    /// - `Reconcile`/`Database` on persistence failure, which the gateway should retry
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        let Some(signature) = signature_header else {
            tracing::warn!("Webhook rejected: missing signature header");
            return Err(BillingError::SignatureInvalid);
        };
        if !verify_signature(raw_body, signature, &self.secret) {
            tracing::warn!(body_len = raw_body.len(), "Webhook rejected: signature mismatch");
            return Err(BillingError::SignatureInvalid);
        }

        let event = WebhookEvent::parse(raw_body).inspect_err(|e| {
            tracing::warn!(error = %e, "Verified webhook has unreadable body");
        })?;

        tracing::info!(event_type = %event.event, "Processing Paystack webhook event");
        self.dispatch(event, OffsetDateTime::now_utc()).await
    }

    async fn dispatch(
        &self,
        event: WebhookEvent,
        received_at: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        match event.event.as_str() {
            "charge.success" => {
                let charge = match ChargeEvent::from_webhook_data(&event.data, received_at) {
                    Ok(charge) => charge,
                    Err(e) => return Ok(ignore(&event.event, e)),
                };
                match self.reconciler.reconcile(&charge).await {
                    Ok(result) => Ok(WebhookOutcome::Payment(result)),
                    Err(e @ BillingError::InvalidEvent(_)) => Ok(ignore(&event.event, e)),
                    Err(e) => Err(e),
                }
            }
            "subscription.create" => Ok(WebhookOutcome::Subscription(
                self.subscriptions
                    .handle_created(&event.data, received_at)
                    .await?,
            )),
            "subscription.disable" => Ok(WebhookOutcome::Subscription(
                self.subscriptions.handle_disabled(&event.data).await?,
            )),
            "subscription.not_renew" => Ok(WebhookOutcome::Subscription(
                self.subscriptions.handle_not_renewing(&event.data).await?,
            )),
            other => {
                tracing::debug!(event_type = %other, "Unhandled webhook event type");
                Ok(WebhookOutcome::Ignored {
                    event: other.to_string(),
                    reason: "unhandled event type".to_string(),
                })
            }
        }
    }
}

fn ignore(event: &str, err: BillingError) -> WebhookOutcome {
    tracing::warn!(event_type = %event, error = %err, "Webhook event acknowledged without action");
    WebhookOutcome::Ignored {
        event: event.to_string(),
        reason: err.to_string(),
    }
}
