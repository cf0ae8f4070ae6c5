//! Risk domain - chargebacks, KYC state, and AML risk scoring.

mod account;
mod chargeback;
mod scoring;

pub use account::{CreatorAccount, KycStatus};
pub use chargeback::{Chargeback, ChargebackResolution, ChargebackStatus};
pub use scoring::{assess, AmlRiskProfile, RiskAssessment, RiskFlag, RiskInputs};
