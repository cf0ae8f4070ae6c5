//! Maps `BillingError` onto HTTP responses.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::foundation::{DomainError, ValidationError};
use crate::domain::payments::BillingError;

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Wrapper so handlers can return `Result<_, ApiError>` and use `?`.
#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err.into())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.error_code(), "request rejected");
        }

        let body = ErrorResponse {
            error: self.0.error_code(),
            message: self.0.public_message(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use crate::domain::foundation::ErrorCode;

    #[test]
    fn invalid_signature_is_unauthorized_and_final() {
        let response = ApiError(BillingError::InvalidSignature).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn storage_failures_ask_for_redelivery() {
        let err = BillingError::Storage("connection reset".to_string());
        assert!(err.is_retryable());
        let response = ApiError(err).into_response();
        assert!(response.status().is_server_error());
    }

    #[test]
    fn domain_errors_convert_through_billing_error() {
        let err: ApiError = DomainError::new(ErrorCode::DatabaseError, "down").into();
        assert!(matches!(err.0, BillingError::Storage(_)));
    }
}
