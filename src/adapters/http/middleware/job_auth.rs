//! Shared-secret guard for scheduler-triggered job endpoints.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::adapters::http::BillingAppState;

pub const JOB_SECRET_HEADER: &str = "x-job-secret";

/// Extractor that admits a request only when `X-Job-Secret` matches.
#[derive(Debug, Clone, Copy)]
pub struct JobAuthorized;

#[async_trait]
impl FromRequestParts<BillingAppState> for JobAuthorized {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &BillingAppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(JOB_SECRET_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        let expected = state.job_secret.expose_secret().as_bytes();

        if !expected.is_empty() && bool::from(presented.ct_eq(expected)) {
            Ok(JobAuthorized)
        } else {
            tracing::warn!(path = %parts.uri.path(), "job request with bad secret");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "UNAUTHENTICATED",
                    "message": "Invalid job secret",
                    "retryable": false,
                })),
            )
                .into_response())
        }
    }
}
