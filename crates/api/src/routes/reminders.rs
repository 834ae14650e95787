//! Manual reminder dispatch

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use duepay_billing::DispatchReport;
use duepay_shared::ReminderChannel;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendReminderRequest {
    #[serde(default = "default_channel")]
    pub channel: ReminderChannel,
}

fn default_channel() -> ReminderChannel {
    ReminderChannel::Email
}

pub async fn send_reminder(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<SendReminderRequest>,
) -> ApiResult<Json<DispatchReport>> {
    let now = OffsetDateTime::now_utc();
    let ctx = state.billing.plan_context(user.owner_id, now).await?;
    let report = state
        .billing
        .reminders
        .send_for_invoice(&ctx, invoice_id, request.channel, now)
        .await?;
    Ok(Json(report))
}
