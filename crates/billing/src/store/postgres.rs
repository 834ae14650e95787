//! Postgres-backed [`BillingStore`]

use async_trait::async_trait;
use duepay_shared::{
    Client, Invoice, Payment, Reminder, Subscription, UsageTracking,
};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{
    BillingStore, NewClient, NewInvoice, NewReminder, PaymentRecord, PaymentWrite, UsageCounter,
};
use crate::error::{BillingError, BillingResult};

#[derive(Debug, FromRow)]
struct ClientRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    business_name: Option<String>,
    created_at: OffsetDateTime,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            business_name: row.business_name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    owner_id: Uuid,
    client_id: Uuid,
    invoice_number: String,
    amount: Decimal,
    currency: String,
    description: Option<String>,
    due_date: Date,
    status: String,
    payment_reference: Option<String>,
    payment_link: Option<String>,
    paid_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id,
            owner_id: row.owner_id,
            client_id: row.client_id,
            invoice_number: row.invoice_number,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            description: row.description,
            due_date: row.due_date,
            status: row.status.parse()?,
            payment_reference: row.payment_reference,
            payment_link: row.payment_link,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Uuid,
    amount: Decimal,
    reference: String,
    paid_at: OffsetDateTime,
    created_at: OffsetDateTime,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            invoice_id: row.invoice_id,
            amount: row.amount,
            reference: row.reference,
            paid_at: row.paid_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReminderRow {
    id: Uuid,
    invoice_id: Uuid,
    channel: String,
    scheduled_at: OffsetDateTime,
    sent_at: Option<OffsetDateTime>,
    status: String,
    message: String,
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = BillingError;

    fn try_from(row: ReminderRow) -> Result<Self, Self::Error> {
        Ok(Reminder {
            id: row.id,
            invoice_id: row.invoice_id,
            channel: row.channel.parse()?,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            status: row.status.parse()?,
            message: row.message,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    owner_id: Uuid,
    tier: String,
    status: String,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    subscription_code: Option<String>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            owner_id: row.owner_id,
            tier: row.tier.parse()?,
            status: row.status.parse()?,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            subscription_code: row.subscription_code,
        })
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    owner_id: Uuid,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
    invoices_created: i64,
    reminders_sent: i64,
    clients_added: i64,
}

impl From<UsageRow> for UsageTracking {
    fn from(row: UsageRow) -> Self {
        UsageTracking {
            owner_id: row.owner_id,
            period_start: row.period_start,
            period_end: row.period_end,
            invoices_created: row.invoices_created,
            reminders_sent: row.reminders_sent,
            clients_added: row.clients_added,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}

/// Postgres implementation of the billing datastore
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn insert_client(&self, client: NewClient) -> BillingResult<Client> {
        let row: ClientRow = sqlx::query_as(
            r#"
            INSERT INTO clients (owner_id, name, email, phone, business_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, owner_id, name, email, phone, business_name, created_at
            "#,
        )
        .bind(client.owner_id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.business_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_client(&self, owner_id: Uuid, client_id: Uuid) -> BillingResult<Option<Client>> {
        let row: Option<ClientRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, email, phone, business_name, created_at
            FROM clients
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(client_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Client::from))
    }

    async fn business_name(&self, owner_id: Uuid) -> BillingResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT business_name FROM profiles WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(name,)| name))
    }

    async fn last_invoice_number(&self, owner_id: Uuid) -> BillingResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT invoice_number
            FROM invoices
            WHERE owner_id = $1
            ORDER BY created_at DESC, invoice_number DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(number,)| number))
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let result: Result<InvoiceRow, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO invoices
                (owner_id, client_id, invoice_number, amount, currency, description, due_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, owner_id, client_id, invoice_number, amount, currency, description,
                      due_date, status, payment_reference, payment_link, paid_at,
                      created_at, updated_at
            "#,
        )
        .bind(invoice.owner_id)
        .bind(invoice.client_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(&invoice.description)
        .bind(invoice.due_date)
        .bind(invoice.status.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(e) if is_unique_violation(&e) => Err(BillingError::Conflict(format!(
                "invoice number {} already exists",
                invoice.invoice_number
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, client_id, invoice_number, amount, currency, description,
                   due_date, status, payment_reference, payment_link, paid_at,
                   created_at, updated_at
            FROM invoices
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(invoice_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Invoice::try_from).transpose()
    }

    async fn get_invoice_by_id(&self, invoice_id: Uuid) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, client_id, invoice_number, amount, currency, description,
                   due_date, status, payment_reference, payment_link, paid_at,
                   created_at, updated_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Invoice::try_from).transpose()
    }

    async fn set_payment_link(
        &self,
        invoice_id: Uuid,
        reference: &str,
        link: &str,
    ) -> BillingResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE invoices
            SET payment_reference = $2, payment_link = $3, updated_at = NOW()
            WHERE id = $1 AND status IN ('draft', 'sent') AND payment_reference IS NULL
            "#,
        )
        .bind(invoice_id)
        .bind(reference)
        .bind(link)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn invoices_due_for_reminder(
        &self,
        due_by: Date,
        quiet_since: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT i.id, i.owner_id, i.client_id, i.invoice_number, i.amount, i.currency,
                   i.description, i.due_date, i.status, i.payment_reference, i.payment_link,
                   i.paid_at, i.created_at, i.updated_at
            FROM invoices i
            WHERE i.status = 'sent'
              AND i.due_date <= $1
              AND NOT EXISTS (
                  SELECT 1 FROM reminders r
                  WHERE r.invoice_id = i.id AND r.scheduled_at >= $2
              )
            ORDER BY i.due_date ASC, i.id ASC
            LIMIT $3
            "#,
        )
        .bind(due_by)
        .bind(quiet_since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn find_payment_by_reference(&self, reference: &str) -> BillingResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, invoice_id, amount, reference, paid_at, created_at
            FROM payments
            WHERE reference = $1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Payment::from))
    }

    async fn record_payment(&self, payment: PaymentRecord) -> BillingResult<PaymentWrite> {
        let mut tx = self.pool.begin().await?;

        // Insert first: a concurrent delivery of the same reference blocks on the
        // unique index until this transaction finishes, then takes DO NOTHING.
        let inserted: Result<Option<PaymentRow>, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO payments (invoice_id, amount, reference, paid_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (reference) DO NOTHING
            RETURNING id, invoice_id, amount, reference, paid_at, created_at
            "#,
        )
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(&payment.reference)
        .bind(payment.paid_at)
        .fetch_optional(&mut *tx)
        .await;

        let row = match inserted {
            Ok(Some(row)) => row,
            Ok(None) => {
                tx.rollback().await?;
                return Ok(PaymentWrite::Duplicate);
            }
            Err(e) if is_foreign_key_violation(&e) => {
                tx.rollback().await?;
                return Ok(PaymentWrite::InvoiceNotPayable);
            }
            Err(e) => return Err(e.into()),
        };

        let updated = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid',
                paid_at = $2,
                payment_reference = $3,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('draft', 'sent')
              AND (payment_reference IS NULL OR payment_reference = $3)
            "#,
        )
        .bind(payment.invoice_id)
        .bind(payment.paid_at)
        .bind(&payment.reference)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(PaymentWrite::InvoiceNotPayable);
        }

        tx.commit().await?;
        Ok(PaymentWrite::Recorded(row.into()))
    }

    async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, invoice_id, amount, reference, paid_at, created_at
            FROM payments
            WHERE invoice_id = $1
            ORDER BY paid_at ASC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }

    async fn insert_reminder(&self, reminder: NewReminder) -> BillingResult<Reminder> {
        let row: ReminderRow = sqlx::query_as(
            r#"
            INSERT INTO reminders (invoice_id, channel, scheduled_at, sent_at, status, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, invoice_id, channel, scheduled_at, sent_at, status, message
            "#,
        )
        .bind(reminder.invoice_id)
        .bind(reminder.channel.as_str())
        .bind(reminder.scheduled_at)
        .bind(reminder.sent_at)
        .bind(reminder.status.as_str())
        .bind(&reminder.message)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn reminders_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Reminder>> {
        let rows: Vec<ReminderRow> = sqlx::query_as(
            r#"
            SELECT id, invoice_id, channel, scheduled_at, sent_at, status, message
            FROM reminders
            WHERE invoice_id = $1
            ORDER BY scheduled_at DESC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reminder::try_from).collect()
    }

    async fn get_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT owner_id, tier, status, current_period_start, current_period_end,
                   cancel_at_period_end, subscription_code
            FROM subscriptions
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_subscription_by_code(&self, code: &str) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT owner_id, tier, status, current_period_start, current_period_end,
                   cancel_at_period_end, subscription_code
            FROM subscriptions
            WHERE subscription_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (owner_id, tier, status, current_period_start, current_period_end,
                 cancel_at_period_end, subscription_code, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (owner_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                status = EXCLUDED.status,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                subscription_code = EXCLUDED.subscription_code,
                updated_at = NOW()
            "#,
        )
        .bind(subscription.owner_id)
        .bind(subscription.tier.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(&subscription.subscription_code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_or_create_usage(
        &self,
        owner_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<UsageTracking> {
        sqlx::query(
            r#"
            INSERT INTO usage_tracking (owner_id, period_start, period_end)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id, period_start) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        let row: UsageRow = sqlx::query_as(
            r#"
            SELECT owner_id, period_start, period_end, invoices_created, reminders_sent, clients_added
            FROM usage_tracking
            WHERE owner_id = $1 AND period_start = $2
            "#,
        )
        .bind(owner_id)
        .bind(period_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn increment_usage(
        &self,
        owner_id: Uuid,
        period_start: OffsetDateTime,
        counter: UsageCounter,
    ) -> BillingResult<()> {
        // Column name comes from a closed enum, never from input
        let column = counter.column();
        let sql = format!(
            "UPDATE usage_tracking SET {column} = {column} + 1 \
             WHERE owner_id = $1 AND period_start = $2"
        );
        sqlx::query(&sql)
            .bind(owner_id)
            .bind(period_start)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
