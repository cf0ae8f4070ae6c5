//! Domain layer - pure billing types and rules, no I/O.

pub mod dunning;
pub mod foundation;
pub mod ledger;
pub mod payments;
pub mod risk;
pub mod subscription;
