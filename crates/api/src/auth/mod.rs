//! Authentication module for Duepay

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_auth, require_cron_secret, AuthError, AuthState, AuthUser, CronAuth};
