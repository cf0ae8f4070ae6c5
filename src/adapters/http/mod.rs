//! HTTP adapter - the axum surface of the billing engine.
//!
//! - `webhooks` - provider deliveries, authenticated by signature
//! - `jobs` - renewal scan and dunning sweep, authenticated by shared secret
//! - `billing` - fan, creator, and admin actions, authenticated by JWT

pub mod billing;
mod error;
pub mod jobs;
pub mod middleware;
mod state;
pub mod webhooks;

use axum::{middleware::from_fn_with_state, routing::get, Router};

pub use error::{ApiError, ErrorResponse};
pub use state::BillingAppState;

use middleware::{auth_middleware, AuthState};

/// Builds the complete application router.
///
/// The bearer-token middleware only wraps `/api`; webhooks and jobs carry
/// their own authentication.
pub fn billing_router(state: BillingAppState, validator: AuthState) -> Router {
    let api = billing::api_routes()
        .nest("/admin", billing::admin_routes())
        .layer(from_fn_with_state(validator, auth_middleware));

    Router::new()
        .route("/health", get(billing::health))
        .nest("/webhooks", webhooks::webhook_routes())
        .nest("/jobs", jobs::job_routes())
        .nest("/api", api)
        .with_state(state)
}
