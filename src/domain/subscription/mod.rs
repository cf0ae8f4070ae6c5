//! Subscription domain - aggregate and status machine.

mod aggregate;
mod status;

pub use aggregate::{NewSubscription, Subscription};
pub use status::{CancellationReason, SubscriptionStatus};
