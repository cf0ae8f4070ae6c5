//! Axum router configuration for billing endpoints.

use axum::{routing::post, Router};

use super::handlers::{
    approve_payout, cancel_subscription, kyc_approved, open_chargeback,
    record_provider_reference, request_payout, resolve_chargeback, start_checkout,
};
use crate::adapters::http::BillingAppState;

/// Fan and creator routes, mounted at `/api`.
pub fn api_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/checkout", post(start_checkout))
        .route("/checkout/provider-reference", post(record_provider_reference))
        .route("/subscriptions/:id/cancel", post(cancel_subscription))
        .route("/payouts", post(request_payout))
}

/// Admin routes, mounted at `/api/admin`.
pub fn admin_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/payouts/:id/approve", post(approve_payout))
        .route("/chargebacks", post(open_chargeback))
        .route("/chargebacks/:id/resolve", post(resolve_chargeback))
        .route("/creators/:id/kyc-approved", post(kyc_approved))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routers_build() {
        let _api: Router<BillingAppState> = api_routes();
        let _admin: Router<BillingAppState> = admin_routes();
    }
}
