// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Duepay API Library
//!
//! HTTP surface for the invoicing core: Paystack webhook and verification
//! callbacks, owner-scoped client/invoice routes, and the reminder sweep.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
