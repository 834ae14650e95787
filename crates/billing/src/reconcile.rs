//! Payment reconciliation
//!
//! Turns a confirmed charge into a Payment row and a paid invoice. The
//! gateway reference is the idempotency key: the store's unique constraint
//! on it decides which of several concurrent deliveries wins.

use std::sync::Arc;

use duepay_shared::Payment;
use uuid::Uuid;

use crate::client::from_minor_units;
use crate::error::{BillingError, BillingResult};
use crate::event::ChargeEvent;
use crate::store::{BillingStore, PaymentRecord, PaymentWrite};

/// What reconciling a charge did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileResult {
    /// Invoice marked paid and payment recorded
    Recorded(Payment),
    /// A payment with this reference already exists; nothing changed
    AlreadyProcessed { reference: String },
    /// Invoice missing, not payable, or tied to another reference; nothing
    /// changed and a human needs to look at it
    InvoiceMismatch { invoice_id: Uuid, reference: String },
}

impl ReconcileResult {
    /// Whether the charge is now reflected in the datastore
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ReconcileResult::Recorded(_) | ReconcileResult::AlreadyProcessed { .. }
        )
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn BillingStore>,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Record `event` against its invoice
    ///
    /// Returns `InvalidEvent` when the charge carries no invoice id; callers on
    /// the webhook path acknowledge that as a no-op. Persistence failures come
    /// back as `Reconcile` and are safe to retry.
    pub async fn reconcile(&self, event: &ChargeEvent) -> BillingResult<ReconcileResult> {
        let Some(invoice_id) = event.invoice_id else {
            tracing::warn!(
                reference = %event.reference,
                amount_minor = event.amount_minor,
                "Charge has no invoice_id in metadata, skipping"
            );
            return Err(BillingError::InvalidEvent(format!(
                "charge {} has no invoice_id",
                event.reference
            )));
        };

        // Fast path for redeliveries. The write below is still guarded by the
        // unique reference, so a racing delivery cannot slip past this.
        if self
            .store
            .find_payment_by_reference(&event.reference)
            .await
            .map_err(|e| reconcile_error(event, invoice_id, e))?
            .is_some()
        {
            tracing::info!(
                reference = %event.reference,
                invoice_id = %invoice_id,
                "Payment already recorded, skipping"
            );
            return Ok(ReconcileResult::AlreadyProcessed {
                reference: event.reference.clone(),
            });
        }

        let amount = from_minor_units(event.amount_minor);

        let invoice = self
            .store
            .get_invoice_by_id(invoice_id)
            .await
            .map_err(|e| reconcile_error(event, invoice_id, e))?;
        if let Some(invoice) = &invoice {
            if invoice.amount != amount {
                tracing::warn!(
                    reference = %event.reference,
                    invoice_id = %invoice_id,
                    invoice_amount = %invoice.amount,
                    charged_amount = %amount,
                    "Charged amount differs from invoice amount, recording as charged"
                );
            }
        }

        let write = self
            .store
            .record_payment(PaymentRecord {
                invoice_id,
                reference: event.reference.clone(),
                amount,
                paid_at: event.paid_at,
            })
            .await
            .map_err(|e| reconcile_error(event, invoice_id, e))?;

        match write {
            PaymentWrite::Recorded(payment) => {
                tracing::info!(
                    reference = %event.reference,
                    invoice_id = %invoice_id,
                    payment_id = %payment.id,
                    amount = %payment.amount,
                    "Payment recorded, invoice marked paid"
                );
                Ok(ReconcileResult::Recorded(payment))
            }
            PaymentWrite::Duplicate => {
                tracing::info!(
                    reference = %event.reference,
                    invoice_id = %invoice_id,
                    "Concurrent delivery already recorded this payment"
                );
                Ok(ReconcileResult::AlreadyProcessed {
                    reference: event.reference.clone(),
                })
            }
            PaymentWrite::InvoiceNotPayable => {
                tracing::error!(
                    reference = %event.reference,
                    invoice_id = %invoice_id,
                    invoice_found = invoice.is_some(),
                    invoice_status = ?invoice.as_ref().map(|i| i.status),
                    amount = %amount,
                    "RECONCILIATION NEEDED: charge succeeded but invoice could not be marked paid"
                );
                Ok(ReconcileResult::InvoiceMismatch {
                    invoice_id,
                    reference: event.reference.clone(),
                })
            }
        }
    }
}

fn reconcile_error(event: &ChargeEvent, invoice_id: Uuid, err: BillingError) -> BillingError {
    tracing::error!(
        reference = %event.reference,
        invoice_id = %invoice_id,
        error = %err,
        "Failed to persist payment"
    );
    BillingError::Reconcile(err.to_string())
}
