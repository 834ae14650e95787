//! Client routes

use axum::{extract::State, http::StatusCode, Extension, Json};
use duepay_billing::CreateClientInput;
use duepay_shared::Client;
use time::OffsetDateTime;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_client(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<CreateClientInput>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    let ctx = state
        .billing
        .plan_context(user.owner_id, OffsetDateTime::now_utc())
        .await?;
    let client = state.billing.clients.create_client(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(client)))
}
