//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use store::StoreError;

/// Shown when a renewal date could not be changed.
pub const RENEWAL_NOT_UPDATED: &str = "Something went wrong. Subscription has not been updated.";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga or renewal error.
    Saga(SagaError),
    /// Store error outside a saga.
    Store(StoreError),
    /// Renewal update failed.
    RenewalNotUpdated(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::RenewalNotUpdated(err) => {
                let (status, _) = saga_error_to_response(err);
                (status, RENEWAL_NOT_UPDATED.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::Store(store_err) => store_error_to_response(store_err),
        SagaError::BusinessNotFound(_)
        | SagaError::PlanNotFound(_)
        | SagaError::SubscriptionNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::NoCardOnFile(_) | SagaError::InvalidAmount { .. } | SagaError::Domain(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        SagaError::Serialization(_) => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match &err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        StoreError::ConcurrencyConflict { .. } | StoreError::Conflict(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}
