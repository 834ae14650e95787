// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Tests boundary conditions and races across components:
//! - Webhook delivery end to end (BILL-W01 to BILL-W05)
//! - Invoice numbering under concurrent creation (BILL-N01 to BILL-N03)
//! - Plan gating boundaries (BILL-G01 to BILL-G04)
//! - Postgres-backed reconciliation (BILL-P01 to BILL-P02, ignored without DATABASE_URL)

#[cfg(test)]
mod webhook_tests {
    use std::sync::Arc;

    use duepay_shared::{Invoice, InvoiceStatus};
    use rust_decimal::Decimal;
    use serde_json::json;
    use time::macros::{date, datetime};
    use uuid::Uuid;

    use crate::error::BillingError;
    use crate::reconcile::{PaymentReconciler, ReconcileResult};
    use crate::store::{BillingStore, InMemoryBillingStore};
    use crate::subscriptions::SubscriptionService;
    use crate::webhooks::{sign, WebhookHandler, WebhookOutcome};

    const SECRET: &str = "sk_test_edge";

    fn handler(store: &InMemoryBillingStore) -> WebhookHandler {
        let store: Arc<dyn BillingStore> = Arc::new(store.clone());
        WebhookHandler::new(
            SECRET,
            PaymentReconciler::new(store.clone()),
            SubscriptionService::new(store),
        )
    }

    async fn seed(store: &InMemoryBillingStore) -> Invoice {
        let invoice = Invoice {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            invoice_number: "INV-20240105-001".to_string(),
            amount: Decimal::new(150000, 2),
            currency: "NGN".to_string(),
            description: Some("Website build".to_string()),
            due_date: date!(2024 - 01 - 20),
            status: InvoiceStatus::Sent,
            payment_reference: None,
            payment_link: None,
            paid_at: None,
            created_at: datetime!(2024-01-05 0:00 UTC),
            updated_at: datetime!(2024-01-05 0:00 UTC),
        };
        store.seed_invoice(invoice.clone()).await;
        invoice
    }

    fn body(invoice_id: Uuid) -> Vec<u8> {
        json!({
            "event": "charge.success",
            "data": {
                "reference": "ref1",
                "amount": 150000,
                "paid_at": "2024-01-10T00:00:00Z",
                "status": "success",
                "metadata": { "invoice_id": invoice_id.to_string() }
            }
        })
        .to_string()
        .into_bytes()
    }

    // =========================================================================
    // BILL-W01: charge.success for ref1 / 150000 minor units marks invoice paid
    // =========================================================================
    #[tokio::test]
    async fn test_charge_success_scenario() {
        let store = InMemoryBillingStore::new();
        let invoice = seed(&store).await;
        let raw = body(invoice.id);
        let signature = sign(&raw, SECRET).unwrap();

        handler(&store).handle(&raw, Some(signature.as_str())).await.unwrap();

        let stored = store.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(stored.paid_at, Some(datetime!(2024-01-10 0:00 UTC)));

        let payments = store.payments_for_invoice(invoice.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount.to_string(), "1500.00");
    }

    // =========================================================================
    // BILL-W02: same delivery replayed - no new payment, still acknowledged
    // =========================================================================
    #[tokio::test]
    async fn test_replayed_delivery_is_acknowledged() {
        let store = InMemoryBillingStore::new();
        let invoice = seed(&store).await;
        let raw = body(invoice.id);
        let signature = sign(&raw, SECRET).unwrap();
        let handler = handler(&store);

        handler.handle(&raw, Some(signature.as_str())).await.unwrap();
        let after_first = store.invoice(invoice.id).await.unwrap();

        let outcome = handler.handle(&raw, Some(signature.as_str())).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Payment(ReconcileResult::AlreadyProcessed {
                reference: "ref1".to_string()
            })
        );
        assert_eq!(store.payment_count().await, 1);
        assert_eq!(store.invoice(invoice.id).await.unwrap(), after_first);
    }

    // =========================================================================
    // BILL-W03: signature for a different body - rejected, nothing written
    // =========================================================================
    #[tokio::test]
    async fn test_signature_from_other_body_rejected() {
        let store = InMemoryBillingStore::new();
        let invoice = seed(&store).await;
        let raw = body(invoice.id);
        let other_signature = sign(b"{}", SECRET).unwrap();

        let err = handler(&store)
            .handle(&raw, Some(other_signature.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
        assert_eq!(store.payment_count().await, 0);
        assert_eq!(
            store.invoice(invoice.id).await.unwrap().status,
            InvoiceStatus::Sent
        );
    }

    // =========================================================================
    // BILL-W04: 10 concurrent deliveries of the same charge - one payment
    // =========================================================================
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_single_payment() {
        use tokio::sync::Barrier;

        let store = InMemoryBillingStore::new();
        let invoice = seed(&store).await;
        let raw = Arc::new(body(invoice.id));
        let signature = Arc::new(sign(&raw, SECRET).unwrap());
        let handler = handler(&store);
        let barrier = Arc::new(Barrier::new(10));

        let mut handles = vec![];
        for _ in 0..10 {
            let handler = handler.clone();
            let raw = raw.clone();
            let signature = signature.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                handler.handle(&raw, Some(signature.as_str())).await
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            if let WebhookOutcome::Payment(ReconcileResult::Recorded(_)) =
                handle.await.unwrap().unwrap()
            {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1, "Exactly one delivery should record the payment");
        assert_eq!(store.payment_count().await, 1);
    }

    // =========================================================================
    // BILL-W05: reference replayed against another invoice - no second payment
    // =========================================================================
    #[tokio::test]
    async fn test_reference_reused_for_other_invoice() {
        let store = InMemoryBillingStore::new();
        let first = seed(&store).await;
        let second = seed(&store).await;
        let handler = handler(&store);

        let raw = body(first.id);
        handler
            .handle(&raw, Some(sign(&raw, SECRET).unwrap().as_str()))
            .await
            .unwrap();

        let raw = body(second.id);
        let outcome = handler
            .handle(&raw, Some(sign(&raw, SECRET).unwrap().as_str()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::Payment(ReconcileResult::AlreadyProcessed { .. })
        ));
        assert_eq!(
            store.invoice(second.id).await.unwrap().status,
            InvoiceStatus::Sent
        );
    }
}

#[cfg(test)]
mod numbering_tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use time::macros::{date, datetime};
    use uuid::Uuid;

    use crate::client::{PaystackClient, PaystackConfig};
    use crate::entitlement::PlanContext;
    use crate::invoices::{CreateInvoiceInput, InvoiceService};
    use crate::numbering::next_invoice_number;
    use crate::store::{BillingStore, InMemoryBillingStore, NewClient};

    // =========================================================================
    // BILL-N01: three concurrent creations for one owner - distinct numbers
    // =========================================================================
    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_concurrent_creation_yields_unique_numbers() {
        let store = InMemoryBillingStore::new();
        let owner = Uuid::new_v4();
        let client = store
            .insert_client(NewClient {
                owner_id: owner,
                name: "Ada".to_string(),
                email: None,
                phone: None,
                business_name: None,
            })
            .await
            .unwrap();
        let gateway =
            PaystackClient::new(PaystackConfig::new("sk_test", "http://127.0.0.1:9")).unwrap();
        let service = InvoiceService::new(Arc::new(store.clone()), gateway, "NGN");
        let ctx = PlanContext::load(&store, owner, datetime!(2024-01-15 9:00 UTC))
            .await
            .unwrap();

        let mut handles = vec![];
        for _ in 0..3 {
            let service = service.clone();
            let ctx = ctx.clone();
            let input = CreateInvoiceInput {
                client_id: client.id,
                amount: Decimal::new(1000, 0),
                currency: None,
                description: None,
                due_date: date!(2024 - 02 - 01),
                send: false,
            };
            handles.push(tokio::spawn(async move {
                service
                    .create_invoice(&ctx, input, date!(2024 - 01 - 15))
                    .await
            }));
        }

        let mut numbers = HashSet::new();
        for handle in handles {
            numbers.insert(handle.await.unwrap().unwrap().invoice_number);
        }
        assert_eq!(numbers.len(), 3);
    }

    // =========================================================================
    // BILL-N02: last number from a future date (clock skew) - restart today
    // =========================================================================
    #[test]
    fn test_last_number_from_future_restarts() {
        assert_eq!(
            next_invoice_number(Some("INV-20240116-004"), date!(2024 - 01 - 15)),
            "INV-20240115-001"
        );
    }

    // =========================================================================
    // BILL-N03: year boundary
    // =========================================================================
    #[test]
    fn test_year_boundary() {
        assert_eq!(
            next_invoice_number(Some("INV-20231231-042"), date!(2024 - 01 - 01)),
            "INV-20240101-001"
        );
    }
}

#[cfg(test)]
mod gating_tests {
    use duepay_shared::PlanTier;

    use crate::entitlement::*;

    // =========================================================================
    // BILL-G01: 49 of 50 allowed, 50 of 50 denied
    // =========================================================================
    #[test]
    fn test_last_allowed_invoice() {
        assert!(can_create_invoice(PlanTier::Starter, 49, invoice_limit(PlanTier::Starter)).allowed);
        assert!(!can_create_invoice(PlanTier::Starter, 50, invoice_limit(PlanTier::Starter)).allowed);
    }

    // =========================================================================
    // BILL-G02: zero limit denies the first invoice
    // =========================================================================
    #[test]
    fn test_zero_limit() {
        let result = can_create_invoice(PlanTier::Starter, 0, Some(0));
        assert!(!result.allowed);
        assert_eq!(usage_warning_level(0, Some(0)), UsageWarningLevel::Exceeded);
    }

    // =========================================================================
    // BILL-G03: thresholds on a limit that does not divide evenly
    // =========================================================================
    #[test]
    fn test_uneven_thresholds() {
        // 70% of 7 is 4.9, so 4 is still below
        assert_eq!(usage_warning_level(4, Some(7)), UsageWarningLevel::None);
        assert_eq!(usage_warning_level(5, Some(7)), UsageWarningLevel::Approaching);
        // 90% of 7 is 6.3
        assert_eq!(usage_warning_level(6, Some(7)), UsageWarningLevel::Approaching);
        assert_eq!(usage_warning_level(7, Some(7)), UsageWarningLevel::Exceeded);
    }

    // =========================================================================
    // BILL-G04: every plan in the table is a known tier, every tier has email
    // =========================================================================
    #[test]
    fn test_every_plan_can_email() {
        for plan in PlanTier::ALL {
            assert!(has_feature(plan, Feature::EmailReminders.as_str()));
            assert!(has_feature(plan, Feature::OnlinePayments.as_str()));
        }
    }
}

#[cfg(test)]
mod postgres_tests {
    use std::sync::Arc;

    use duepay_shared::InvoiceStatus;
    use rust_decimal::Decimal;
    use time::macros::date;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::store::{
        BillingStore, NewClient, NewInvoice, PaymentRecord, PaymentWrite, PgBillingStore,
    };

    async fn store() -> PgBillingStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = duepay_shared::create_pool(&url).await.unwrap();
        duepay_shared::run_migrations(&pool).await.unwrap();
        PgBillingStore::new(pool)
    }

    async fn seed_invoice(store: &PgBillingStore) -> Uuid {
        let owner = Uuid::new_v4();
        let client = store
            .insert_client(NewClient {
                owner_id: owner,
                name: "Concurrency".to_string(),
                email: Some("c@example.com".to_string()),
                phone: None,
                business_name: None,
            })
            .await
            .unwrap();
        store
            .insert_invoice(NewInvoice {
                owner_id: owner,
                client_id: client.id,
                invoice_number: "INV-20240101-001".to_string(),
                amount: Decimal::new(150000, 2),
                currency: "NGN".to_string(),
                description: None,
                due_date: date!(2024 - 01 - 31),
                status: InvoiceStatus::Sent,
            })
            .await
            .unwrap()
            .id
    }

    // =========================================================================
    // BILL-P01: concurrent record_payment with one reference - one row
    // =========================================================================
    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_concurrent_record_payment() {
        let store = Arc::new(store().await);
        let invoice_id = seed_invoice(&store).await;
        let reference = format!("ref_{}", Uuid::new_v4());

        let mut handles = vec![];
        for _ in 0..10 {
            let store = store.clone();
            let reference = reference.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_payment(PaymentRecord {
                        invoice_id,
                        reference,
                        amount: Decimal::new(150000, 2),
                        paid_at: OffsetDateTime::now_utc(),
                    })
                    .await
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                PaymentWrite::Recorded(_) => recorded += 1,
                PaymentWrite::Duplicate => {}
                PaymentWrite::InvoiceNotPayable => panic!("invoice should stay payable"),
            }
        }
        assert_eq!(recorded, 1);
        assert_eq!(store.payments_for_invoice(invoice_id).await.unwrap().len(), 1);
    }

    // =========================================================================
    // BILL-P02: payment for a missing invoice writes nothing
    // =========================================================================
    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_missing_invoice_rolls_back() {
        let store = store().await;
        let reference = format!("ref_{}", Uuid::new_v4());

        let write = store
            .record_payment(PaymentRecord {
                invoice_id: Uuid::new_v4(),
                reference: reference.clone(),
                amount: Decimal::ONE,
                paid_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
        assert_eq!(write, PaymentWrite::InvoiceNotPayable);
        assert!(store
            .find_payment_by_reference(&reference)
            .await
            .unwrap()
            .is_none());
    }
}
