//! Server configuration loaded from the environment

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// HS256 secret of the external auth provider that issues bearer tokens
    pub supabase_jwt_secret: String,
    /// Bearer secret for the reminder sweep; the route is not mounted without it
    pub cron_secret: Option<String>,
    pub allowed_origins: Vec<String>,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET")?,
            cron_secret: std::env::var("CRON_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            allowed_origins,
        })
    }
}
