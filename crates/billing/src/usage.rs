//! Usage metering per billing period
//!
//! The period is the subscription's current period when one is set and
//! covers `now`; otherwise it is the UTC calendar month containing `now`.

use duepay_shared::{Subscription, UsageTracking};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, UsageCounter};

/// Bounds of one billing period, `start` inclusive and `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl BillingPeriod {
    pub fn for_owner(subscription: Option<&Subscription>, now: OffsetDateTime) -> BillingResult<Self> {
        if let Some(sub) = subscription {
            if let (Some(start), Some(end)) = (sub.current_period_start, sub.current_period_end) {
                if start <= now && now < end {
                    return Ok(Self { start, end });
                }
            }
        }
        Self::calendar_month(now)
    }

    /// UTC calendar month containing `now`
    pub fn calendar_month(now: OffsetDateTime) -> BillingResult<Self> {
        let now = now.to_offset(time::UtcOffset::UTC);
        let first = month_start(now.year(), now.month())?;
        let (next_year, next_month) = match now.month() {
            Month::December => (now.year() + 1, Month::January),
            month => (now.year(), month.next()),
        };
        let next = month_start(next_year, next_month)?;
        Ok(Self {
            start: first,
            end: next,
        })
    }
}

fn month_start(year: i32, month: Month) -> BillingResult<OffsetDateTime> {
    let date = Date::from_calendar_date(year, month, 1)
        .map_err(|e| BillingError::Internal(format!("invalid period start: {}", e)))?;
    Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

/// Usage counters for the owner's current period, created at zero if absent
pub async fn current_usage(
    store: &dyn BillingStore,
    owner_id: Uuid,
    subscription: Option<&Subscription>,
    now: OffsetDateTime,
) -> BillingResult<UsageTracking> {
    let period = BillingPeriod::for_owner(subscription, now)?;
    store
        .get_or_create_usage(owner_id, period.start, period.end)
        .await
}

/// Bump one counter on the usage row returned by [`current_usage`]
///
/// Failures are logged and swallowed: metering must never fail the
/// operation it is counting.
pub async fn record(store: &dyn BillingStore, usage: &UsageTracking, counter: UsageCounter) {
    if let Err(e) = store
        .increment_usage(usage.owner_id, usage.period_start, counter)
        .await
    {
        tracing::warn!(
            owner_id = %usage.owner_id,
            counter = counter.column(),
            error = %e,
            "Failed to record usage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use duepay_shared::{PlanTier, SubscriptionStatus};
    use time::macros::datetime;

    fn subscription(
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Subscription {
        Subscription {
            owner_id: Uuid::nil(),
            tier: PlanTier::Professional,
            status: SubscriptionStatus::Active,
            current_period_start: start,
            current_period_end: end,
            cancel_at_period_end: false,
            subscription_code: None,
        }
    }

    #[test]
    fn test_calendar_month_bounds() {
        let period = BillingPeriod::calendar_month(datetime!(2024-02-17 13:45 UTC)).unwrap();
        assert_eq!(period.start, datetime!(2024-02-01 0:00 UTC));
        assert_eq!(period.end, datetime!(2024-03-01 0:00 UTC));
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        let period = BillingPeriod::calendar_month(datetime!(2024-12-31 23:59 UTC)).unwrap();
        assert_eq!(period.start, datetime!(2024-12-01 0:00 UTC));
        assert_eq!(period.end, datetime!(2025-01-01 0:00 UTC));
    }

    #[test]
    fn test_subscription_period_is_preferred_when_current() {
        let sub = subscription(
            Some(datetime!(2024-01-15 0:00 UTC)),
            Some(datetime!(2024-02-15 0:00 UTC)),
        );
        let period = BillingPeriod::for_owner(Some(&sub), datetime!(2024-02-01 0:00 UTC)).unwrap();
        assert_eq!(period.start, datetime!(2024-01-15 0:00 UTC));
    }

    #[test]
    fn test_stale_subscription_period_falls_back_to_month() {
        let sub = subscription(
            Some(datetime!(2023-11-15 0:00 UTC)),
            Some(datetime!(2023-12-15 0:00 UTC)),
        );
        let period = BillingPeriod::for_owner(Some(&sub), datetime!(2024-02-01 0:00 UTC)).unwrap();
        assert_eq!(period.start, datetime!(2024-02-01 0:00 UTC));

        let open = subscription(Some(datetime!(2024-01-15 0:00 UTC)), None);
        let period = BillingPeriod::for_owner(Some(&open), datetime!(2024-02-01 0:00 UTC)).unwrap();
        assert_eq!(period.start, datetime!(2024-02-01 0:00 UTC));
    }

    #[tokio::test]
    async fn test_record_increments_current_row() {
        let store = InMemoryBillingStore::new();
        let owner = Uuid::new_v4();
        let now = datetime!(2024-03-10 9:00 UTC);

        let usage = current_usage(&store, owner, None, now).await.unwrap();
        assert_eq!(usage.invoices_created, 0);

        record(&store, &usage, UsageCounter::InvoicesCreated).await;
        record(&store, &usage, UsageCounter::InvoicesCreated).await;
        record(&store, &usage, UsageCounter::RemindersSent).await;

        let usage = current_usage(&store, owner, None, now).await.unwrap();
        assert_eq!(usage.invoices_created, 2);
        assert_eq!(usage.reminders_sent, 1);
        assert_eq!(usage.clients_added, 0);
    }
}
