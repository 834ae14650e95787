//! Invoice routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use duepay_billing::{CreateInvoiceInput, PaymentLink};
use duepay_shared::Invoice;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<CreateInvoiceInput>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let now = OffsetDateTime::now_utc();
    let ctx = state.billing.plan_context(user.owner_id, now).await?;
    let invoice = state
        .billing
        .invoices
        .create_invoice(&ctx, input, now.date())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(invoice.with_effective_status(now.date())),
    ))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    let today = OffsetDateTime::now_utc().date();
    let invoice = state
        .billing
        .invoices
        .get_invoice(user.owner_id, invoice_id, today)
        .await?;
    Ok(Json(invoice))
}

pub async fn create_payment_link(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<PaymentLink>> {
    let ctx = state
        .billing
        .plan_context(user.owner_id, OffsetDateTime::now_utc())
        .await?;
    let link = state
        .billing
        .invoices
        .create_payment_link(&ctx, invoice_id)
        .await?;
    Ok(Json(link))
}
