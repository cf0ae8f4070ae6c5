//! Foundation module - Shared domain primitives.
//!
//! Identifiers, money and currency value objects, timestamps, the state
//! machine trait, and error types used across the billing domain.

mod auth;
mod errors;
mod ids;
mod money;
mod state_machine;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser, Role};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{ChargebackId, DunningAttemptId, PaymentId, PayoutId, SubscriptionId, UserId};
pub use money::{format_minor_amount, CountryCode, Currency};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;

#[cfg(test)]
pub(crate) use state_machine::assert_consistent;
