//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duepay_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            ApiError::Billing(err) => match err {
                BillingError::SignatureInvalid => (StatusCode::UNAUTHORIZED, "invalid_signature"),
                BillingError::InvalidEvent(_) => (StatusCode::BAD_REQUEST, "invalid_event"),
                BillingError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
                BillingError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                BillingError::QuotaExceeded { .. } => (StatusCode::FORBIDDEN, "quota_exceeded"),
                BillingError::FeatureUnavailable { .. } => {
                    (StatusCode::FORBIDDEN, "feature_unavailable")
                }
                BillingError::MissingContact { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "missing_contact")
                }
                BillingError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                BillingError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway_error"),
                BillingError::Notification(_) => (StatusCode::BAD_GATEWAY, "notification_error"),
                BillingError::Reconcile(_)
                | BillingError::Config(_)
                | BillingError::Database(_)
                | BillingError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            // Opaque: callers learn nothing about why a signature failed
            ApiError::Billing(BillingError::SignatureInvalid) => "Invalid signature".to_string(),
            _ if status.is_server_error() && status != StatusCode::BAD_GATEWAY => {
                tracing::error!(error = %self, "Request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let mut body = json!({
            "error": code,
            "message": message,
        });
        match &self {
            ApiError::Billing(BillingError::QuotaExceeded { plan, limit, .. }) => {
                body["plan"] = json!(plan);
                body["limit"] = json!(limit);
                body["upgrade_to"] = json!(plan.upgrade());
            }
            ApiError::Billing(BillingError::FeatureUnavailable { feature, plan }) => {
                body["feature"] = json!(feature);
                body["plan"] = json!(plan);
                body["upgrade_to"] = json!(plan.upgrade());
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duepay_shared::{PlanTier, ReminderChannel};

    #[test]
    fn test_billing_error_status_mapping() {
        let cases = [
            (BillingError::SignatureInvalid, StatusCode::UNAUTHORIZED),
            (BillingError::InvalidEvent("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                BillingError::QuotaExceeded {
                    plan: PlanTier::Starter,
                    limit: 50,
                    message: "limit".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                BillingError::MissingContact {
                    channel: ReminderChannel::Sms,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (BillingError::Gateway("down".into()), StatusCode::BAD_GATEWAY),
            (BillingError::Reconcile("db".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
