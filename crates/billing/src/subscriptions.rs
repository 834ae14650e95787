//! Subscription sync from gateway events
//!
//! The owner has a single subscription row, upserted on owner id. Paystack
//! reports lifecycle changes as `subscription.create`, `subscription.disable`
//! and `subscription.not_renew`.

use std::sync::Arc;

use duepay_shared::{PlanTier, Subscription, SubscriptionStatus};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::parse_gateway_timestamp;
use crate::error::BillingResult;
use crate::event::owner_id_from_data;
use crate::store::BillingStore;

/// What a subscription event changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSync {
    Activated { owner_id: Uuid, tier: PlanTier },
    Cancelled { owner_id: Uuid },
    WillNotRenew { owner_id: Uuid },
    Ignored { reason: String },
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn get_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>> {
        self.store.get_subscription(owner_id).await
    }

    /// `subscription.create`: the owner is now on the plan named in the event
    pub async fn handle_created(
        &self,
        data: &Value,
        now: OffsetDateTime,
    ) -> BillingResult<SubscriptionSync> {
        let Some(owner_id) = owner_id_from_data(data) else {
            return Ok(ignored(data, "no owner_id in subscription metadata"));
        };

        let plan_name = data
            .get("plan")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let tier: PlanTier = match plan_name.parse() {
            Ok(tier) => tier,
            Err(_) => {
                tracing::warn!(
                    owner_id = %owner_id,
                    plan_name = %plan_name,
                    "Unrecognised plan name on subscription event"
                );
                return Ok(ignored(data, "unrecognised plan name"));
            }
        };

        let period_start = timestamp(data, &["createdAt", "created_at"]).unwrap_or(now);
        let period_end = timestamp(data, &["next_payment_date", "nextPaymentDate"]);

        let subscription = Subscription {
            owner_id,
            tier,
            status: SubscriptionStatus::Active,
            current_period_start: Some(period_start),
            current_period_end: period_end,
            cancel_at_period_end: false,
            subscription_code: subscription_code(data),
        };
        self.store.upsert_subscription(&subscription).await?;

        tracing::info!(
            owner_id = %owner_id,
            tier = %tier,
            subscription_code = ?subscription.subscription_code,
            "Subscription activated"
        );
        Ok(SubscriptionSync::Activated { owner_id, tier })
    }

    /// `subscription.disable`: the owner falls back to Starter entitlements
    pub async fn handle_disabled(&self, data: &Value) -> BillingResult<SubscriptionSync> {
        let Some(mut subscription) = self.find(data).await? else {
            return Ok(ignored(data, "no subscription for event"));
        };

        subscription.status = SubscriptionStatus::Cancelled;
        self.store.upsert_subscription(&subscription).await?;

        tracing::info!(
            owner_id = %subscription.owner_id,
            tier = %subscription.tier,
            "Subscription cancelled"
        );
        Ok(SubscriptionSync::Cancelled {
            owner_id: subscription.owner_id,
        })
    }

    /// `subscription.not_renew`: keep access until the period ends
    pub async fn handle_not_renewing(&self, data: &Value) -> BillingResult<SubscriptionSync> {
        let Some(mut subscription) = self.find(data).await? else {
            return Ok(ignored(data, "no subscription for event"));
        };

        subscription.cancel_at_period_end = true;
        self.store.upsert_subscription(&subscription).await?;

        tracing::info!(
            owner_id = %subscription.owner_id,
            period_end = ?subscription.current_period_end,
            "Subscription set to end at period end"
        );
        Ok(SubscriptionSync::WillNotRenew {
            owner_id: subscription.owner_id,
        })
    }

    async fn find(&self, data: &Value) -> BillingResult<Option<Subscription>> {
        if let Some(owner_id) = owner_id_from_data(data) {
            if let Some(subscription) = self.store.get_subscription(owner_id).await? {
                return Ok(Some(subscription));
            }
        }
        match subscription_code(data) {
            Some(code) => self.store.find_subscription_by_code(&code).await,
            None => Ok(None),
        }
    }
}

fn subscription_code(data: &Value) -> Option<String> {
    data.get("subscription_code")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn timestamp(data: &Value, keys: &[&str]) -> Option<OffsetDateTime> {
    keys.iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_str))
        .find_map(parse_gateway_timestamp)
}

fn ignored(data: &Value, reason: &str) -> SubscriptionSync {
    tracing::warn!(
        subscription_code = ?subscription_code(data),
        reason = reason,
        "Subscription event ignored"
    );
    SubscriptionSync::Ignored {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-01 0:00 UTC);

    fn created_event(owner_id: Uuid, plan: &str) -> Value {
        json!({
            "subscription_code": "SUB_abc",
            "status": "active",
            "createdAt": "2024-03-01T10:00:00.000Z",
            "next_payment_date": "2024-04-01T10:00:00.000Z",
            "plan": { "name": plan, "interval": "monthly" },
            "customer": { "email": "owner@example.com", "metadata": { "owner_id": owner_id.to_string() } }
        })
    }

    fn service() -> (InMemoryBillingStore, SubscriptionService) {
        let store = InMemoryBillingStore::new();
        (store.clone(), SubscriptionService::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn test_create_upserts_active_subscription() {
        let (store, service) = service();
        let owner = Uuid::new_v4();

        let sync = service
            .handle_created(&created_event(owner, "Professional Monthly"), NOW)
            .await
            .unwrap();
        assert_eq!(
            sync,
            SubscriptionSync::Activated {
                owner_id: owner,
                tier: PlanTier::Professional
            }
        );

        let sub = store.get_subscription(owner).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.current_period_end, Some(datetime!(2024-04-01 10:00 UTC)));
        assert_eq!(sub.subscription_code.as_deref(), Some("SUB_abc"));
    }

    #[tokio::test]
    async fn test_create_replaces_existing_row() {
        let (store, service) = service();
        let owner = Uuid::new_v4();
        service
            .handle_created(&created_event(owner, "Professional"), NOW)
            .await
            .unwrap();
        service
            .handle_created(&created_event(owner, "Enterprise"), NOW)
            .await
            .unwrap();

        let sub = store.get_subscription(owner).await.unwrap().unwrap();
        assert_eq!(sub.tier, PlanTier::Enterprise);
    }

    #[tokio::test]
    async fn test_disable_by_code_cancels() {
        let (store, service) = service();
        let owner = Uuid::new_v4();
        service
            .handle_created(&created_event(owner, "Enterprise"), NOW)
            .await
            .unwrap();

        let sync = service
            .handle_disabled(&json!({"subscription_code": "SUB_abc", "status": "complete"}))
            .await
            .unwrap();
        assert_eq!(sync, SubscriptionSync::Cancelled { owner_id: owner });
        assert_eq!(
            store.get_subscription(owner).await.unwrap().unwrap().status,
            SubscriptionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_not_renew_keeps_access() {
        let (store, service) = service();
        let owner = Uuid::new_v4();
        service
            .handle_created(&created_event(owner, "Professional"), NOW)
            .await
            .unwrap();

        service
            .handle_not_renewing(&json!({"subscription_code": "SUB_abc"}))
            .await
            .unwrap();
        let sub = store.get_subscription(owner).await.unwrap().unwrap();
        assert!(sub.cancel_at_period_end);
        assert!(sub.is_entitled());
    }

    #[tokio::test]
    async fn test_events_without_owner_are_ignored() {
        let (_, service) = service();
        let sync = service
            .handle_created(&json!({"plan": {"name": "Professional"}}), NOW)
            .await
            .unwrap();
        assert!(matches!(sync, SubscriptionSync::Ignored { .. }));

        let sync = service
            .handle_disabled(&json!({"subscription_code": "SUB_unknown"}))
            .await
            .unwrap();
        assert!(matches!(sync, SubscriptionSync::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_unknown_plan_is_ignored() {
        let (store, service) = service();
        let owner = Uuid::new_v4();
        let sync = service
            .handle_created(&created_event(owner, "Gold"), NOW)
            .await
            .unwrap();
        assert!(matches!(sync, SubscriptionSync::Ignored { .. }));
        assert!(store.get_subscription(owner).await.unwrap().is_none());
    }
}
