//! Routes invoked by the external scheduler

use axum::{extract::State, Json};
use duepay_billing::SweepSummary;
use time::OffsetDateTime;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn run_reminder_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepSummary>> {
    let summary = state
        .billing
        .reminders
        .run_sweep(OffsetDateTime::now_utc())
        .await?;
    Ok(Json(summary))
}
