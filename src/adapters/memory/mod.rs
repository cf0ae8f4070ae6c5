//! In-memory adapters for local runs and tests.

mod billing_store;

pub use billing_store::InMemoryBillingStore;
