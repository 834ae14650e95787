//! Payment gateway callbacks

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use duepay_billing::{ReconcileResult, VerificationOutcome, WebhookOutcome, SIGNATURE_HEADER};
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Paystack webhook receiver
///
/// The body is taken as raw bytes: the signature covers the exact bytes
/// received, so it must not be parsed before verification.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = match state.billing.webhooks.handle(&body, signature).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if e.is_retryable() {
                tracing::error!(error = %e, "Webhook processing failed; gateway will retry");
            } else {
                tracing::warn!(error = %e, "Webhook rejected");
            }
            return Err(e.into());
        }
    };

    match &outcome {
        WebhookOutcome::Payment(ReconcileResult::Recorded(payment)) => {
            tracing::info!(
                reference = %payment.reference,
                invoice_id = %payment.invoice_id,
                "Webhook payment recorded"
            );
        }
        WebhookOutcome::Payment(result) => {
            tracing::info!(result = ?result, "Webhook payment acknowledged without changes");
        }
        WebhookOutcome::Subscription(sync) => {
            tracing::info!(sync = ?sync, "Webhook subscription processed");
        }
        WebhookOutcome::Ignored { event, reason } => {
            tracing::debug!(event = %event, reason = %reason, "Webhook ignored");
        }
    }

    Ok(Json(json!({ "received": true })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub reference: Option<String>,
}

/// Checkout return page poll: ask the gateway and reconcile on success
pub async fn verify_payment(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Json<VerificationOutcome>> {
    let reference = query
        .reference
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::BadRequest("reference is required".to_string()))?;

    let outcome = state
        .billing
        .verifier
        .verify(&reference, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(outcome))
}
