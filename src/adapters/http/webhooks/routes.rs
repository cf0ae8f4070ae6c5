//! Axum router for webhook ingress.

use axum::{routing::post, Router};

use super::handlers::receive_webhook;
use crate::adapters::http::BillingAppState;

/// Mounted at `/webhooks`.
///
/// # Routes
/// - `POST /:provider` - stripe, paystack, flutterwave, mpesa
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/:provider", post(receive_webhook))
}
