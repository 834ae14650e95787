//! Invoice creation, payment links and reads

use std::sync::Arc;

use duepay_shared::{Invoice, InvoiceStatus, ReminderChannel};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use crate::client::PaystackClient;
use crate::entitlement::{Feature, PlanContext};
use crate::error::{BillingError, BillingResult};
use crate::numbering::next_invoice_number;
use crate::store::{BillingStore, NewInvoice, UsageCounter};
use crate::usage;

/// Attempts at numbering before giving up on a concurrent-creation collision
const NUMBERING_ATTEMPTS: usize = 3;

const MAX_DESCRIPTION_CHARS: usize = 2000;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceInput {
    pub client_id: Uuid,
    pub amount: Decimal,
    /// Defaults to the deployment currency
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "iso_date")]
    pub due_date: Date,
    /// Create as `Sent` rather than `Draft`
    #[serde(default)]
    pub send: bool,
}

/// Hosted checkout attached to an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLink {
    pub invoice_id: Uuid,
    pub authorization_url: String,
    pub reference: String,
}

fn normalise_currency(raw: &str) -> BillingResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(code)
    } else {
        Err(BillingError::InvalidInput(format!(
            "currency must be a 3-letter code, got '{}'",
            raw
        )))
    }
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
    gateway: PaystackClient,
    default_currency: String,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: PaystackClient,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            default_currency: default_currency.into(),
        }
    }

    /// Create an invoice for one of the owner's clients
    ///
    /// Checks the plan quota against `ctx`, numbers the invoice and counts it
    /// towards the period's usage.
    pub async fn create_invoice(
        &self,
        ctx: &PlanContext,
        input: CreateInvoiceInput,
        today: Date,
    ) -> BillingResult<Invoice> {
        if input.amount <= Decimal::ZERO {
            return Err(BillingError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }
        if input.amount.scale() > 2 && input.amount != input.amount.round_dp(2) {
            return Err(BillingError::InvalidInput(
                "amount cannot have more than two decimal places".to_string(),
            ));
        }
        let currency =
            normalise_currency(input.currency.as_deref().unwrap_or(&self.default_currency))?;
        let description = input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS)
        {
            return Err(BillingError::InvalidInput(format!(
                "description cannot exceed {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        self.store
            .get_client(ctx.owner_id, input.client_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("client {}", input.client_id)))?;

        ctx.ensure_can_create_invoice()?;

        let status = if input.send {
            InvoiceStatus::Sent
        } else {
            InvoiceStatus::Draft
        };

        let mut attempt = 0;
        let invoice = loop {
            attempt += 1;
            let last = self.store.last_invoice_number(ctx.owner_id).await?;
            let number = next_invoice_number(last.as_deref(), today);

            let result = self
                .store
                .insert_invoice(NewInvoice {
                    owner_id: ctx.owner_id,
                    client_id: input.client_id,
                    invoice_number: number.clone(),
                    amount: input.amount.round_dp(2),
                    currency: currency.clone(),
                    description: description.clone(),
                    due_date: input.due_date,
                    status,
                })
                .await;

            match result {
                Ok(invoice) => break invoice,
                Err(BillingError::Conflict(_)) if attempt < NUMBERING_ATTEMPTS => {
                    tracing::debug!(
                        owner_id = %ctx.owner_id,
                        invoice_number = %number,
                        attempt = attempt,
                        "Invoice number taken by a concurrent request, renumbering"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        usage::record(self.store.as_ref(), &ctx.usage, UsageCounter::InvoicesCreated).await;

        tracing::info!(
            owner_id = %ctx.owner_id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            status = %invoice.status,
            "Invoice created"
        );
        Ok(invoice)
    }

    /// Invoice with its read-time status
    pub async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        today: Date,
    ) -> BillingResult<Invoice> {
        self.store
            .get_invoice(owner_id, invoice_id)
            .await?
            .map(|invoice| invoice.with_effective_status(today))
            .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id)))
    }

    /// Hosted checkout for an unpaid invoice
    ///
    /// An invoice keeps the first checkout created for it, so the reference
    /// the reconciler expects never changes under a payer mid-checkout.
    pub async fn create_payment_link(
        &self,
        ctx: &PlanContext,
        invoice_id: Uuid,
    ) -> BillingResult<PaymentLink> {
        ctx.require_feature(Feature::OnlinePayments)?;

        let invoice = self
            .store
            .get_invoice(ctx.owner_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id)))?;

        if !invoice.status.is_payable() {
            return Err(BillingError::InvalidInput(format!(
                "invoice {} is {} and cannot be paid",
                invoice.invoice_number, invoice.status
            )));
        }

        if let (Some(link), Some(reference)) = (&invoice.payment_link, &invoice.payment_reference)
        {
            return Ok(PaymentLink {
                invoice_id,
                authorization_url: link.clone(),
                reference: reference.clone(),
            });
        }

        let client = self
            .store
            .get_client(ctx.owner_id, invoice.client_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("client {}", invoice.client_id)))?;
        let email = client
            .contact_for(ReminderChannel::Email)
            .ok_or(BillingError::MissingContact {
                channel: ReminderChannel::Email,
            })?;

        let charge = self
            .gateway
            .initialize_charge(invoice.amount, email, invoice.id, &invoice.currency)
            .await?;

        let stored = self
            .store
            .set_payment_link(invoice.id, &charge.reference, &charge.authorization_url)
            .await?;
        if !stored {
            // Another request stored its checkout first, or the invoice settled.
            let current = self
                .store
                .get_invoice(ctx.owner_id, invoice_id)
                .await?
                .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id)))?;
            if let (true, Some(link), Some(reference)) = (
                current.status.is_payable(),
                current.payment_link,
                current.payment_reference,
            ) {
                tracing::info!(
                    invoice_id = %invoice.id,
                    discarded_reference = %charge.reference,
                    reference = %reference,
                    "Payment link already stored, discarding duplicate checkout"
                );
                return Ok(PaymentLink {
                    invoice_id,
                    authorization_url: link,
                    reference,
                });
            }
            tracing::warn!(
                invoice_id = %invoice.id,
                reference = %charge.reference,
                "Invoice settled while creating payment link"
            );
            return Err(BillingError::InvalidInput(format!(
                "invoice {} can no longer be paid",
                invoice.invoice_number
            )));
        }

        Ok(PaymentLink {
            invoice_id,
            authorization_url: charge.authorization_url,
            reference: charge.reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PaystackConfig;
    use crate::event::ChargeEvent;
    use crate::reconcile::{PaymentReconciler, ReconcileResult};
    use crate::store::{InMemoryBillingStore, NewClient};
    use serde_json::json;
    use time::macros::{date, datetime};

    const TODAY: Date = date!(2024 - 01 - 15);

    struct Fixture {
        store: InMemoryBillingStore,
        service: InvoiceService,
        owner_id: Uuid,
        client_id: Uuid,
    }

    async fn fixture(base_url: &str) -> Fixture {
        let store = InMemoryBillingStore::new();
        let owner_id = Uuid::new_v4();
        let client = store
            .insert_client(NewClient {
                owner_id,
                name: "Ada".to_string(),
                email: Some("ada@example.com".to_string()),
                phone: None,
                business_name: None,
            })
            .await
            .unwrap();
        let gateway = PaystackClient::new(PaystackConfig::new("sk_test", base_url)).unwrap();
        Fixture {
            service: InvoiceService::new(Arc::new(store.clone()), gateway, "NGN"),
            store,
            owner_id,
            client_id: client.id,
        }
    }

    fn input(client_id: Uuid) -> CreateInvoiceInput {
        CreateInvoiceInput {
            client_id,
            amount: Decimal::new(150000, 2),
            currency: None,
            description: Some("Consulting".to_string()),
            due_date: date!(2024 - 01 - 31),
            send: true,
        }
    }

    async fn ctx(f: &Fixture) -> PlanContext {
        PlanContext::load(&f.store, f.owner_id, datetime!(2024-01-15 9:00 UTC))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_numbers_sequentially() {
        let f = fixture("http://127.0.0.1:9").await;

        let first = f
            .service
            .create_invoice(&ctx(&f).await, input(f.client_id), TODAY)
            .await
            .unwrap();
        let second = f
            .service
            .create_invoice(&ctx(&f).await, input(f.client_id), TODAY)
            .await
            .unwrap();

        assert_eq!(first.invoice_number, "INV-20240115-001");
        assert_eq!(second.invoice_number, "INV-20240115-002");
        assert_eq!(first.status, InvoiceStatus::Sent);
        assert_eq!(first.currency, "NGN");
        assert_eq!(ctx(&f).await.usage.invoices_created, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let f = fixture("http://127.0.0.1:9").await;
        let c = ctx(&f).await;

        let mut zero = input(f.client_id);
        zero.amount = Decimal::ZERO;
        assert!(matches!(
            f.service.create_invoice(&c, zero, TODAY).await,
            Err(BillingError::InvalidInput(_))
        ));

        let mut currency = input(f.client_id);
        currency.currency = Some("naira".to_string());
        assert!(matches!(
            f.service.create_invoice(&c, currency, TODAY).await,
            Err(BillingError::InvalidInput(_))
        ));

        let mut precise = input(f.client_id);
        precise.amount = Decimal::new(10005, 3);
        assert!(matches!(
            f.service.create_invoice(&c, precise, TODAY).await,
            Err(BillingError::InvalidInput(_))
        ));

        assert!(matches!(
            f.service.create_invoice(&c, input(Uuid::new_v4()), TODAY).await,
            Err(BillingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_starter_quota_blocks_creation() {
        let f = fixture("http://127.0.0.1:9").await;
        let usage = ctx(&f).await.usage;
        for _ in 0..50 {
            f.store
                .increment_usage(f.owner_id, usage.period_start, UsageCounter::InvoicesCreated)
                .await
                .unwrap();
        }

        let err = f
            .service
            .create_invoice(&ctx(&f).await, input(f.client_id), TODAY)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::QuotaExceeded { limit: 50, .. }));
        assert_eq!(f.store.last_invoice_number(f.owner_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_invoice_reads_overdue() {
        let f = fixture("http://127.0.0.1:9").await;
        let created = f
            .service
            .create_invoice(&ctx(&f).await, input(f.client_id), TODAY)
            .await
            .unwrap();

        let read = f
            .service
            .get_invoice(f.owner_id, created.id, date!(2024 - 02 - 01))
            .await
            .unwrap();
        assert_eq!(read.status, InvoiceStatus::Overdue);
        assert_eq!(
            f.store.invoice(created.id).await.unwrap().status,
            InvoiceStatus::Sent
        );

        assert!(matches!(
            f.service.get_invoice(Uuid::new_v4(), created.id, TODAY).await,
            Err(BillingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_link_is_created_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "ok",
                    "data": {
                        "authorization_url": "https://checkout.paystack.com/xyz",
                        "access_code": "xyz",
                        "reference": "ref_xyz"
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let c = ctx(&f).await;
        let invoice = f
            .service
            .create_invoice(&c, input(f.client_id), TODAY)
            .await
            .unwrap();

        let link = f.service.create_payment_link(&c, invoice.id).await.unwrap();
        assert_eq!(link.reference, "ref_xyz");
        let again = f.service.create_payment_link(&c, invoice.id).await.unwrap();
        assert_eq!(again, link);

        let stored = f.store.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some("ref_xyz"));
        mock.assert_async().await;
    }

    fn initialize_body(reference: &str) -> String {
        json!({
            "status": true,
            "message": "ok",
            "data": {
                "authorization_url": format!("https://checkout.paystack.com/{}", reference),
                "access_code": reference,
                "reference": reference
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_concurrent_payment_links_share_one_checkout() {
        let mut server = mockito::Server::new_async().await;
        // Each initialize call hands out a fresh reference
        let _first = server
            .mock("POST", "/transaction/initialize")
            .with_status(200)
            .with_body(initialize_body("ref_0"))
            .expect(1)
            .create_async()
            .await;
        let _second = server
            .mock("POST", "/transaction/initialize")
            .with_status(200)
            .with_body(initialize_body("ref_1"))
            .expect(1)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let c = ctx(&f).await;
        let invoice = f
            .service
            .create_invoice(&c, input(f.client_id), TODAY)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            f.service.create_payment_link(&c, invoice.id),
            f.service.create_payment_link(&c, invoice.id)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);

        let stored = f.store.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some(a.reference.as_str()));
        assert_eq!(stored.payment_link.as_deref(), Some(a.authorization_url.as_str()));

        let reconciler = PaymentReconciler::new(Arc::new(f.store.clone()));
        let result = reconciler
            .reconcile(&ChargeEvent {
                reference: a.reference.clone(),
                amount_minor: 150000,
                paid_at: datetime!(2024-01-20 10:00 UTC),
                invoice_id: Some(invoice.id),
            })
            .await
            .unwrap();
        assert!(matches!(result, ReconcileResult::Recorded(_)));
        assert_eq!(
            f.store.invoice(invoice.id).await.unwrap().status,
            InvoiceStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_payment_link_kept_when_store_already_has_one() {
        let f = fixture("http://127.0.0.1:9").await;
        let c = ctx(&f).await;
        let invoice = f
            .service
            .create_invoice(&c, input(f.client_id), TODAY)
            .await
            .unwrap();

        assert!(f
            .store
            .set_payment_link(invoice.id, "ref_first", "https://checkout.paystack.com/first")
            .await
            .unwrap());
        assert!(!f
            .store
            .set_payment_link(invoice.id, "ref_second", "https://checkout.paystack.com/second")
            .await
            .unwrap());

        let stored = f.store.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some("ref_first"));
        assert_eq!(
            stored.payment_link.as_deref(),
            Some("https://checkout.paystack.com/first")
        );
    }
}
