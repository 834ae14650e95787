//! Plan and feature gating
//!
//! Feature access is a static lookup table keyed by feature, valued by the set
//! of plans that include it. Anything not in the table is denied.
//!
//! [`PlanContext`] is built once per request from the owner's subscription and
//! current usage, and passed explicitly to the operations that need it.

use duepay_shared::{PlanTier, Subscription, SubscriptionStatus, UsageTracking};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;
use crate::usage;

/// Gated product features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    EmailReminders,
    OnlinePayments,
    SmsReminders,
    RecurringInvoices,
    CustomBranding,
    AdvancedAnalytics,
    ApiAccess,
    PrioritySupport,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::EmailReminders => "email_reminders",
            Feature::OnlinePayments => "online_payments",
            Feature::SmsReminders => "sms_reminders",
            Feature::RecurringInvoices => "recurring_invoices",
            Feature::CustomBranding => "custom_branding",
            Feature::AdvancedAnalytics => "advanced_analytics",
            Feature::ApiAccess => "api_access",
            Feature::PrioritySupport => "priority_support",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        FEATURE_TABLE
            .iter()
            .map(|(feature, _)| *feature)
            .find(|feature| feature.as_str() == key)
    }
}

const ALL_PLANS: &[PlanTier] = &[
    PlanTier::Starter,
    PlanTier::Professional,
    PlanTier::Enterprise,
];
const PAID_PLANS: &[PlanTier] = &[PlanTier::Professional, PlanTier::Enterprise];
const ENTERPRISE_ONLY: &[PlanTier] = &[PlanTier::Enterprise];

/// Feature → plans that include it
pub const FEATURE_TABLE: &[(Feature, &[PlanTier])] = &[
    (Feature::EmailReminders, ALL_PLANS),
    (Feature::OnlinePayments, ALL_PLANS),
    (Feature::SmsReminders, PAID_PLANS),
    (Feature::RecurringInvoices, PAID_PLANS),
    (Feature::CustomBranding, PAID_PLANS),
    (Feature::AdvancedAnalytics, PAID_PLANS),
    (Feature::ApiAccess, ENTERPRISE_ONLY),
    (Feature::PrioritySupport, ENTERPRISE_ONLY),
];

/// Monthly invoice allowance. `None` is unlimited.
pub fn invoice_limit(plan: PlanTier) -> Option<i64> {
    match plan {
        PlanTier::Starter => Some(50),
        PlanTier::Professional | PlanTier::Enterprise => None,
    }
}

/// Whether `plan` includes the feature named `feature`
///
/// Unknown feature names resolve to `false`.
pub fn has_feature(plan: PlanTier, feature: &str) -> bool {
    FEATURE_TABLE
        .iter()
        .find(|(f, _)| f.as_str() == feature)
        .is_some_and(|(_, plans)| plans.contains(&plan))
}

/// Outcome of a quota check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceAllowance {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Check whether another invoice may be created this period
pub fn can_create_invoice(
    plan: PlanTier,
    invoices_created_this_period: i64,
    limit: Option<i64>,
) -> InvoiceAllowance {
    match limit {
        None => InvoiceAllowance {
            allowed: true,
            reason: None,
        },
        Some(limit) if invoices_created_this_period < limit => InvoiceAllowance {
            allowed: true,
            reason: None,
        },
        Some(limit) => InvoiceAllowance {
            allowed: false,
            reason: Some(quota_message(plan, limit)),
        },
    }
}

fn quota_message(plan: PlanTier, limit: i64) -> String {
    let upgrade = match plan.upgrade() {
        Some(next) => format!(
            "Upgrade to the {} plan to create more invoices.",
            next.display_name()
        ),
        None => "Contact support to raise your limit.".to_string(),
    };
    format!(
        "You have reached the {} plan limit of {} invoices this billing period. {}",
        plan.display_name(),
        limit,
        upgrade
    )
}

/// How close an owner is to their invoice limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageWarningLevel {
    None,
    Approaching,
    Critical,
    Exceeded,
}

/// Warning level at 70%, 90% and 100% of `limit`
pub fn usage_warning_level(created: i64, limit: Option<i64>) -> UsageWarningLevel {
    let Some(limit) = limit else {
        return UsageWarningLevel::None;
    };
    // Integer comparison avoids float rounding at the thresholds
    let used = i128::from(created) * 100;
    let limit = i128::from(limit);
    if used >= limit * 100 {
        UsageWarningLevel::Exceeded
    } else if used >= limit * 90 {
        UsageWarningLevel::Critical
    } else if used >= limit * 70 {
        UsageWarningLevel::Approaching
    } else {
        UsageWarningLevel::None
    }
}

/// Plan state for one owner, loaded once per request
#[derive(Debug, Clone, Serialize)]
pub struct PlanContext {
    pub owner_id: Uuid,
    pub tier: PlanTier,
    pub subscription_status: Option<SubscriptionStatus>,
    pub usage: UsageTracking,
}

impl PlanContext {
    /// Load the owner's entitled tier and current-period usage
    ///
    /// Owners without a trial or active subscription are treated as Starter.
    pub async fn load(
        store: &dyn BillingStore,
        owner_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Self> {
        let subscription = store.get_subscription(owner_id).await?;
        let usage = usage::current_usage(store, owner_id, subscription.as_ref(), now).await?;
        Ok(Self::from_parts(owner_id, subscription.as_ref(), usage))
    }

    pub fn from_parts(
        owner_id: Uuid,
        subscription: Option<&Subscription>,
        usage: UsageTracking,
    ) -> Self {
        let tier = subscription
            .filter(|s| s.is_entitled())
            .map(|s| s.tier)
            .unwrap_or(PlanTier::Starter);
        Self {
            owner_id,
            tier,
            subscription_status: subscription.map(|s| s.status),
            usage,
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        has_feature(self.tier, feature.as_str())
    }

    pub fn require_feature(&self, feature: Feature) -> BillingResult<()> {
        if self.has_feature(feature) {
            Ok(())
        } else {
            Err(BillingError::FeatureUnavailable {
                feature: feature.as_str().to_string(),
                plan: self.tier,
            })
        }
    }

    pub fn invoice_limit(&self) -> Option<i64> {
        invoice_limit(self.tier)
    }

    pub fn invoice_allowance(&self) -> InvoiceAllowance {
        can_create_invoice(self.tier, self.usage.invoices_created, self.invoice_limit())
    }

    /// Error with upgrade guidance when the quota is used up
    ///
    /// Best-effort: the count is read when the context is loaded, so
    /// concurrent creations can each pass before any of them is counted.
    pub fn ensure_can_create_invoice(&self) -> BillingResult<()> {
        let allowance = self.invoice_allowance();
        if allowance.allowed {
            return Ok(());
        }
        let limit = self.invoice_limit().unwrap_or_default();
        Err(BillingError::QuotaExceeded {
            plan: self.tier,
            limit,
            message: allowance
                .reason
                .unwrap_or_else(|| quota_message(self.tier, limit)),
        })
    }

    pub fn warning_level(&self) -> UsageWarningLevel {
        usage_warning_level(self.usage.invoices_created, self.invoice_limit())
    }
}
