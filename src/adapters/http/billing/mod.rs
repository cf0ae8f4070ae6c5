//! HTTP adapter for fan, creator, and admin billing actions.
//!
//! ## User Endpoints (Bearer JWT)
//! - `POST /api/checkout` - Start a subscription checkout
//! - `POST /api/checkout/provider-reference` - Attach a provider-assigned id
//! - `POST /api/subscriptions/{id}/cancel` - Cancel a subscription
//! - `POST /api/payouts` - Request a creator payout
//!
//! ## Admin Endpoints (admin role)
//! - `POST /api/admin/payouts/{id}/approve`
//! - `POST /api/admin/chargebacks`
//! - `POST /api/admin/chargebacks/{id}/resolve`
//! - `POST /api/admin/creators/{id}/kyc-approved`

pub mod dto;
mod handlers;
mod routes;

pub use handlers::*;
pub use routes::{admin_routes, api_routes};
