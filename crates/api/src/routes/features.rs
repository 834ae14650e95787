//! Feature access checks

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use duepay_billing::has_feature;
use duepay_shared::PlanTier;
use serde::Serialize;
use time::OffsetDateTime;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FeatureAccess {
    pub feature: String,
    pub plan: PlanTier,
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_to: Option<PlanTier>,
}

/// Unknown feature keys report no access
pub async fn check_feature(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(feature): Path<String>,
) -> ApiResult<Json<FeatureAccess>> {
    let ctx = state
        .billing
        .plan_context(user.owner_id, OffsetDateTime::now_utc())
        .await?;
    let has_access = has_feature(ctx.tier, &feature);

    Ok(Json(FeatureAccess {
        feature,
        plan: ctx.tier,
        has_access,
        upgrade_to: if has_access { None } else { ctx.tier.upgrade() },
    }))
}
