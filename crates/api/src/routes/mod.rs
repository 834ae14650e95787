//! HTTP routes

pub mod clients;
pub mod cron;
pub mod features;
pub mod invoices;
pub mod payments;
pub mod reminders;
pub mod usage;


use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::auth::{require_auth, require_cron_secret, CronAuth};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Owner-scoped routes: bearer JWT required
    let protected = Router::new()
        .route("/api/clients", post(clients::create_client))
        .route("/api/invoices", post(invoices::create_invoice))
        .route("/api/invoices/{id}", get(invoices::get_invoice))
        .route(
            "/api/invoices/{id}/payment-link",
            post(invoices::create_payment_link),
        )
        .route(
            "/api/invoices/{id}/reminders",
            post(reminders::send_reminder),
        )
        .route("/api/features/{feature}", get(features::check_feature))
        .route("/api/usage", get(usage::get_usage))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_auth,
        ));

    // Gateway-facing routes: the webhook authenticates by signature
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/webhook/payment", post(payments::payment_webhook))
        .route("/payment/verify", get(payments::verify_payment))
        .merge(protected);

    if let Some(secret) = state.config.cron_secret.clone() {
        let cron_routes = Router::new()
            .route("/cron/reminders", post(cron::run_reminder_sweep))
            .route_layer(middleware::from_fn_with_state(
                CronAuth { secret },
                require_cron_secret,
            ));
        router = router.merge(cron_routes);
    }

    router.with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
