//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use super::jwt::JwtManager;

/// Authenticated owner extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub owner_id: Uuid,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

/// State for the cron routes
#[derive(Clone)]
pub struct CronAuth {
    pub secret: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingAuth => "Authentication required",
            AuthError::InvalidToken => "Invalid or expired token",
        };

        let body = Json(json!({
            "error": "unauthorized",
            "message": message,
        }));

        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that requires a valid bearer token and stores [`AuthUser`]
/// in the request extensions
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(&request) else {
        tracing::debug!(path = %path, "require_auth: no bearer token");
        return AuthError::MissingAuth.into_response();
    };

    match auth_state.jwt_manager.validate_access_token(token) {
        Ok(claims) => {
            tracing::debug!(path = %path, owner_id = %claims.sub, "require_auth: authenticated");
            request.extensions_mut().insert(AuthUser {
                owner_id: claims.sub,
            });
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "require_auth: token rejected");
            AuthError::InvalidToken.into_response()
        }
    }
}

/// Middleware for scheduler-invoked routes: bearer must equal the cron secret
pub async fn require_cron_secret(
    State(cron): State<CronAuth>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = extract_bearer_token(&request)
        .map(|token| bool::from(token.as_bytes().ct_eq(cron.secret.as_bytes())))
        .unwrap_or(false);

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Cron request rejected");
        return AuthError::InvalidToken.into_response();
    }
    next.run(request).await
}
