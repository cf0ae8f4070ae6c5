//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing services to external systems:
//! - `providers` - Stripe, Paystack, Flutterwave, M-Pesa, and the router
//! - `postgres` - sqlx-backed transactional store
//! - `memory` - in-memory transactional store for tests and local runs
//! - `notify` - notification sinks
//! - `auth` - bearer token validation
//! - `http` - axum surface

pub mod auth;
pub mod http;
pub mod memory;
pub mod notify;
pub mod postgres;
pub mod providers;
