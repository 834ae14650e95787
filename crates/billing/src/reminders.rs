//! Payment reminder dispatch
//!
//! Renders a reminder for one invoice, hands it to the channel's transport
//! and records the attempt. Scheduling is external: the sweep runs when the
//! cron route is called.

use std::sync::Arc;

use duepay_shared::{Client, Invoice, InvoiceStatus, Reminder, ReminderChannel, ReminderStatus};
use serde::Serialize;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

use crate::entitlement::{Feature, PlanContext};
use crate::error::{BillingError, BillingResult};
use crate::notify::{Notifiers, OutboundMessage};
use crate::store::{BillingStore, NewReminder, UsageCounter};
use crate::usage;

/// Stored reminder copy is cut to this many characters
pub const MAX_STORED_MESSAGE_CHARS: usize = 500;

/// Sweep picks invoices due within this many days
pub const SWEEP_LOOKAHEAD_DAYS: i64 = 3;

/// No second reminder for an invoice within this window
pub const SWEEP_QUIET_HOURS: i64 = 24;

const SWEEP_BATCH: i64 = 500;

const FALLBACK_BUSINESS_NAME: &str = "your service provider";

/// Whole days from `now` until the start of `due_date` (UTC), rounded up
///
/// Zero or positive means due today or later; negative means overdue.
pub fn days_offset(due_date: time::Date, now: OffsetDateTime) -> i64 {
    let due = PrimitiveDateTime::new(due_date, Time::MIDNIGHT).assume_utc();
    let seconds = (due - now).whole_seconds();
    let day = Duration::DAY.whole_seconds();
    seconds.div_euclid(day) + i64::from(seconds.rem_euclid(day) > 0)
}

/// A rendered reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReminder {
    pub subject: String,
    pub body: String,
}

/// Fill the before-due or overdue template
pub fn render_reminder(
    invoice: &Invoice,
    client: &Client,
    business_name: &str,
    now: OffsetDateTime,
) -> RenderedReminder {
    let offset = days_offset(invoice.due_date, now);
    let days = offset.unsigned_abs();
    let amount = format!("{} {:.2}", invoice.currency, invoice.amount);
    let pay_line = invoice
        .payment_link
        .as_deref()
        .map(|link| format!(" You can pay online here: {}", link))
        .unwrap_or_default();

    if offset >= 0 {
        let when = match days {
            0 => "today".to_string(),
            1 => "in 1 day".to_string(),
            n => format!("in {} days", n),
        };
        RenderedReminder {
            subject: format!("Payment reminder: invoice {}", invoice.invoice_number),
            body: format!(
                "Hi {}, this is a friendly reminder from {} that invoice {} for {} is due {} ({}).{}",
                client.name, business_name, invoice.invoice_number, amount, when, invoice.due_date, pay_line
            ),
        }
    } else {
        let overdue = if days == 1 {
            "1 day".to_string()
        } else {
            format!("{} days", days)
        };
        RenderedReminder {
            subject: format!("Overdue: invoice {}", invoice.invoice_number),
            body: format!(
                "Hi {}, invoice {} from {} for {} is now {} overdue (due {}). Please arrange payment as soon as possible.{}",
                client.name, invoice.invoice_number, business_name, amount, overdue, invoice.due_date, pay_line
            ),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub reminder: Reminder,
}

/// Totals for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub considered: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct ReminderDispatcher {
    store: Arc<dyn BillingStore>,
    notifiers: Notifiers,
}

impl ReminderDispatcher {
    pub fn new(store: Arc<dyn BillingStore>, notifiers: Notifiers) -> Self {
        Self { store, notifiers }
    }

    /// Send one reminder and record the attempt
    ///
    /// Fails before any delivery when the channel is not on the plan, the
    /// invoice is settled, or the client lacks the channel's contact field.
    /// A transport failure is not an error: it comes back as
    /// `success = false` with a `Failed` reminder row.
    pub async fn dispatch(
        &self,
        ctx: &PlanContext,
        invoice: &Invoice,
        client: &Client,
        business_name: &str,
        channel: ReminderChannel,
        now: OffsetDateTime,
    ) -> BillingResult<DispatchReport> {
        let feature = match channel {
            ReminderChannel::Email => Feature::EmailReminders,
            ReminderChannel::Sms => Feature::SmsReminders,
        };
        ctx.require_feature(feature)?;

        if matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled) {
            return Err(BillingError::InvalidInput(format!(
                "invoice {} is {}",
                invoice.invoice_number, invoice.status
            )));
        }

        let Some(to) = client.contact_for(channel) else {
            tracing::info!(
                invoice_id = %invoice.id,
                client_id = %client.id,
                channel = %channel,
                "Reminder not sent: client has no contact for channel"
            );
            return Err(BillingError::MissingContact { channel });
        };

        let rendered = render_reminder(invoice, client, business_name, now);
        let message = OutboundMessage {
            to: to.to_string(),
            subject: rendered.subject,
            body: rendered.body,
        };

        let delivery = self.notifiers.for_channel(channel).send(&message).await;
        let (status, sent_at, error) = match &delivery {
            Ok(provider_id) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    owner_id = %invoice.owner_id,
                    channel = %channel,
                    provider_id = %provider_id,
                    "Reminder sent"
                );
                (ReminderStatus::Sent, Some(now), None)
            }
            Err(e) => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    owner_id = %invoice.owner_id,
                    channel = %channel,
                    error = %e,
                    "Reminder delivery failed"
                );
                (ReminderStatus::Failed, None, Some(e.to_string()))
            }
        };

        let reminder = self
            .store
            .insert_reminder(NewReminder {
                invoice_id: invoice.id,
                channel,
                scheduled_at: now,
                sent_at,
                status,
                message: truncate_chars(&message.body, MAX_STORED_MESSAGE_CHARS),
            })
            .await?;

        if status == ReminderStatus::Sent {
            usage::record(self.store.as_ref(), &ctx.usage, UsageCounter::RemindersSent).await;
        }

        Ok(DispatchReport {
            success: status == ReminderStatus::Sent,
            error,
            reminder,
        })
    }

    /// Load the invoice, client and sender name for an owner, then dispatch
    pub async fn send_for_invoice(
        &self,
        ctx: &PlanContext,
        invoice_id: Uuid,
        channel: ReminderChannel,
        now: OffsetDateTime,
    ) -> BillingResult<DispatchReport> {
        let invoice = self
            .store
            .get_invoice(ctx.owner_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id)))?
            .with_effective_status(now.date());
        let client = self
            .store
            .get_client(ctx.owner_id, invoice.client_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("client {}", invoice.client_id)))?;
        let business_name = self.sender_name(ctx.owner_id, &client).await?;

        self.dispatch(ctx, &invoice, &client, &business_name, channel, now)
            .await
    }

    async fn sender_name(&self, owner_id: Uuid, client: &Client) -> BillingResult<String> {
        let name = self.store.business_name(owner_id).await?;
        Ok(name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| client.business_name.clone().filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| FALLBACK_BUSINESS_NAME.to_string()))
    }

    /// Remind every sent invoice that is due soon or overdue and has not
    /// been reminded within the quiet window
    pub async fn run_sweep(&self, now: OffsetDateTime) -> BillingResult<SweepSummary> {
        let due_by = now.date() + Duration::days(SWEEP_LOOKAHEAD_DAYS);
        let quiet_since = now - Duration::hours(SWEEP_QUIET_HOURS);
        let invoices = self
            .store
            .invoices_due_for_reminder(due_by, quiet_since, SWEEP_BATCH)
            .await?;

        let mut summary = SweepSummary {
            considered: invoices.len(),
            ..Default::default()
        };

        for invoice in invoices {
            match self.sweep_one(&invoice, now).await {
                Ok(Some(report)) if report.success => summary.sent += 1,
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        invoice_id = %invoice.id,
                        owner_id = %invoice.owner_id,
                        error = %e,
                        "Reminder sweep skipped invoice"
                    );
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            considered = summary.considered,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Reminder sweep complete"
        );
        Ok(summary)
    }

    async fn sweep_one(
        &self,
        invoice: &Invoice,
        now: OffsetDateTime,
    ) -> BillingResult<Option<DispatchReport>> {
        let Some(client) = self
            .store
            .get_client(invoice.owner_id, invoice.client_id)
            .await?
        else {
            return Ok(None);
        };
        let ctx = PlanContext::load(self.store.as_ref(), invoice.owner_id, now).await?;

        let channel = if client.contact_for(ReminderChannel::Email).is_some() {
            ReminderChannel::Email
        } else if client.contact_for(ReminderChannel::Sms).is_some()
            && ctx.has_feature(Feature::SmsReminders)
        {
            ReminderChannel::Sms
        } else {
            return Ok(None);
        };

        let business_name = self.sender_name(invoice.owner_id, &client).await?;
        let invoice = invoice.clone().with_effective_status(now.date());
        self.dispatch(&ctx, &invoice, &client, &business_name, channel, now)
            .await
            .map(Some)
    }
}
