//! Dunning domain - retry attempts and the backoff policy.

mod attempt;
mod policy;

pub use attempt::{DunningAttempt, DunningOutcome};
pub use policy::{DunningPolicy, DunningStep};
