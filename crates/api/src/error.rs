//! Unified error handling with Sentry integration.
//!
//! All route handlers return `Result<T, ApiError>`. The taxonomy maps
//! directly to response statuses: validation 400, not-found 404,
//! conflict (terminal order) 409, gone (cancelled/deleted) 410,
//! payment-gateway failure 502, anything else 500. On payment-path
//! routes CRM failures never appear here - they are swallowed and
//! logged at the call site, so a CRM outage cannot change a
//! payment-path response. Only the standalone subscribe route, which
//! has no payment side, surfaces CRM errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::KitError;
use crate::stripe::StripeError;

/// Application-level error type for the preorder API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed required input. Reported before any
    /// external call is attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced customer/session/intent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempted action against a terminal (cancelled) order.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The preorder was cancelled or its customer record hard-deleted;
    /// callers must render "no longer available".
    #[error("Preorder is gone: {0}")]
    Gone(String),

    /// Payment gateway call failed.
    #[error("Gateway error: {0}")]
    Stripe(#[from] StripeError),

    /// CRM call failed on a route whose whole job is the CRM.
    #[error("CRM error: {0}")]
    Kit(#[from] KitError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Capture server-side errors to Sentry
        if matches!(self, Self::Stripe(_) | Self::Kit(_) | Self::Internal(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Stripe(StripeError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gone(_) => StatusCode::GONE,
            Self::Stripe(_) | Self::Kit(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Don't pass upstream error bodies through to clients
        let body = match &self {
            Self::Stripe(StripeError::NotFound(what)) => json!({ "error": format!("Not found: {what}") }),
            Self::Stripe(_) => json!({ "error": "Payment service error" }),
            Self::Kit(_) => json!({ "error": "Subscription service error" }),
            Self::Internal(_) => json!({ "error": "Internal server error" }),
            Self::Gone(reason) => json!({ "cancelled": true, "reason": reason }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `ApiError`.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn get_status(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            get_status(ApiError::Validation("missing customer_id".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(ApiError::NotFound("cus_123".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(ApiError::Conflict("preorder is cancelled".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(ApiError::Gone("preorder_cancelled".into())),
            StatusCode::GONE
        );
        assert_eq!(
            get_status(ApiError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_gateway_not_found_maps_to_404() {
        let err = ApiError::Stripe(StripeError::NotFound("cs_123".into()));
        assert_eq!(get_status(err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_gateway_failure_maps_to_502() {
        let err = ApiError::Stripe(StripeError::Api {
            status: 500,
            code: None,
            message: "internal error, do not leak this".into(),
        });
        assert_eq!(get_status(err), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_display() {
        let err = ApiError::Validation("missing code".into());
        assert_eq!(err.to_string(), "Validation error: missing code");
    }
}
