//! Application state

use std::sync::Arc;

use duepay_billing::BillingService;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub billing: Arc<BillingService>,
    pub auth: AuthState,
}

impl AppState {
    pub fn new(config: Config, billing: BillingService) -> Self {
        let auth = AuthState {
            jwt_manager: JwtManager::with_supabase_secret(&config.supabase_jwt_secret),
        };

        if config.cron_secret.is_none() {
            tracing::warn!("CRON_SECRET not set - reminder sweep route disabled");
        }

        Self {
            config,
            billing: Arc::new(billing),
            auth,
        }
    }
}
