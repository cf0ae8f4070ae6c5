//! PostgreSQL adapters.
//!
//! - `PostgresBillingStore` - transactional store backed by sqlx; schema in
//!   `migrations/`

mod billing_store;

pub use billing_store::PostgresBillingStore;
