//! Poll-and-reconcile fallback for payments whose webhook never arrived

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{from_minor_units, PaystackClient};
use crate::error::BillingResult;
use crate::event::ChargeEvent;
use crate::reconcile::{PaymentReconciler, ReconcileResult};

/// Result returned to the payer's browser after checkout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub success: bool,
    /// Gateway transaction status, e.g. `success` or `abandoned`
    pub status: String,
    pub reference: String,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    pub invoice_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PaymentVerifier {
    gateway: PaystackClient,
    reconciler: PaymentReconciler,
}

impl PaymentVerifier {
    pub fn new(gateway: PaystackClient, reconciler: PaymentReconciler) -> Self {
        Self {
            gateway,
            reconciler,
        }
    }

    /// Ask the gateway about `reference` and reconcile it if it succeeded
    ///
    /// Reconciling here is idempotent with the webhook path: whichever
    /// arrives second finds the payment already recorded.
    pub async fn verify(
        &self,
        reference: &str,
        now: OffsetDateTime,
    ) -> BillingResult<VerificationOutcome> {
        let tx = self.gateway.verify_transaction(reference).await?;
        let event = ChargeEvent::from_verification(&tx, now);

        let mut outcome = VerificationOutcome {
            success: false,
            status: tx.status.clone(),
            reference: tx.reference.clone(),
            amount: from_minor_units(tx.amount_minor),
            paid_at: tx.paid_at,
            invoice_id: event.invoice_id,
        };

        if !tx.is_successful() {
            tracing::info!(
                reference = %tx.reference,
                status = %tx.status,
                "Verified transaction has not succeeded"
            );
            return Ok(outcome);
        }

        let result = self.reconciler.reconcile(&event).await?;
        outcome.success = result.is_settled();
        outcome.paid_at = Some(event.paid_at);
        if let ReconcileResult::InvoiceMismatch { invoice_id, .. } = result {
            tracing::warn!(
                reference = %tx.reference,
                invoice_id = %invoice_id,
                "Verified charge could not be applied to its invoice"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PaystackConfig;
    use crate::error::BillingError;
    use crate::store::InMemoryBillingStore;
    use duepay_shared::{Invoice, InvoiceStatus};
    use serde_json::json;
    use std::sync::Arc;
    use time::macros::{date, datetime};

    const NOW: OffsetDateTime = datetime!(2024-01-10 12:00 UTC);

    fn invoice() -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            invoice_number: "INV-20240101-001".to_string(),
            amount: Decimal::new(150000, 2),
            currency: "NGN".to_string(),
            description: None,
            due_date: date!(2024 - 01 - 31),
            status: InvoiceStatus::Sent,
            payment_reference: Some("ref1".to_string()),
            payment_link: Some("https://checkout.paystack.com/abc".to_string()),
            paid_at: None,
            created_at: datetime!(2024-01-01 0:00 UTC),
            updated_at: datetime!(2024-01-01 0:00 UTC),
        }
    }

    fn verifier(store: &InMemoryBillingStore, url: String) -> PaymentVerifier {
        PaymentVerifier::new(
            PaystackClient::new(PaystackConfig::new("sk_test", url)).unwrap(),
            PaymentReconciler::new(Arc::new(store.clone())),
        )
    }

    fn verify_body(status: &str, metadata: serde_json::Value) -> String {
        json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "status": status,
                "reference": "ref1",
                "amount": 150000,
                "paid_at": "2024-01-10T09:00:00.000Z",
                "metadata": metadata
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_successful_verification_reconciles_once() {
        let store = InMemoryBillingStore::new();
        let inv = invoice();
        store.seed_invoice(inv.clone()).await;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/ref1")
            .with_status(200)
            .with_body(verify_body("success", json!({"invoice_id": inv.id.to_string()})))
            .expect(2)
            .create_async()
            .await;

        let verifier = verifier(&store, server.url());
        let first = verifier.verify("ref1", NOW).await.unwrap();
        let second = verifier.verify("ref1", NOW).await.unwrap();

        assert!(first.success);
        assert_eq!(first.amount, Decimal::new(150000, 2));
        assert_eq!(first.invoice_id, Some(inv.id));
        assert_eq!(first.paid_at, Some(datetime!(2024-01-10 9:00 UTC)));
        assert_eq!(first, second);
        assert_eq!(store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_transaction_changes_nothing() {
        let store = InMemoryBillingStore::new();
        let inv = invoice();
        store.seed_invoice(inv.clone()).await;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/ref1")
            .with_status(200)
            .with_body(verify_body("failed", json!({"invoice_id": inv.id.to_string()})))
            .create_async()
            .await;

        let outcome = verifier(&store, server.url()).verify("ref1", NOW).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.status, "failed");
        assert_eq!(store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_success_without_invoice_id_is_invalid_event() {
        let store = InMemoryBillingStore::new();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/ref1")
            .with_status(200)
            .with_body(verify_body("success", json!("")))
            .create_async()
            .await;

        let err = verifier(&store, server.url())
            .verify("ref1", NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidEvent(_)));
    }
}
