//! Current-period usage

use axum::{extract::State, Extension, Json};
use duepay_billing::{InvoiceAllowance, UsageWarningLevel};
use duepay_shared::PlanTier;
use serde::Serialize;
use time::OffsetDateTime;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub plan: PlanTier,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    pub invoices_created: i64,
    pub reminders_sent: i64,
    pub clients_added: i64,
    /// `None` when the plan is unlimited
    pub invoice_limit: Option<i64>,
    pub warning_level: UsageWarningLevel,
    pub can_create_invoice: InvoiceAllowance,
}

pub async fn get_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<UsageResponse>> {
    let ctx = state
        .billing
        .plan_context(user.owner_id, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(UsageResponse {
        plan: ctx.tier,
        period_start: ctx.usage.period_start,
        period_end: ctx.usage.period_end,
        invoices_created: ctx.usage.invoices_created,
        reminders_sent: ctx.usage.reminders_sent,
        clients_added: ctx.usage.clients_added,
        invoice_limit: ctx.invoice_limit(),
        warning_level: ctx.warning_level(),
        can_create_invoice: ctx.invoice_allowance(),
    }))
}
