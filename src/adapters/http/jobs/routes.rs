//! Axum router for job endpoints.

use axum::{routing::post, Router};

use super::handlers::{dunning_sweep, renewal_scan};
use crate::adapters::http::BillingAppState;

/// Mounted at `/jobs`.
pub fn job_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/renewal-scan", post(renewal_scan))
        .route("/dunning-sweep", post(dunning_sweep))
}
