//! Creator payout requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{
    Currency, PayoutId, StateMachine, Timestamp, UserId, ValidationError,
};
use crate::domain::payments::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Requested,
    /// Approved; provider call in flight.
    Processing,
    Paid,
    Failed,
}

impl StateMachine for PayoutStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PayoutStatus::*;
        // Processing -> Requested when the provider outcome is unknown.
        matches!(
            (self, target),
            (Requested, Processing)
                | (Processing, Paid)
                | (Processing, Failed)
                | (Processing, Requested)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PayoutStatus::*;
        match self {
            Requested => vec![Processing],
            Processing => vec![Paid, Failed, Requested],
            Paid | Failed => vec![],
        }
    }
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Requested => "requested",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(PayoutStatus::Requested),
            "processing" => Ok(PayoutStatus::Processing),
            "paid" => Ok(PayoutStatus::Paid),
            "failed" => Ok(PayoutStatus::Failed),
            other => Err(ValidationError::invalid_format("payout_status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub creator_id: UserId,
    pub amount: i64,
    pub currency: Currency,
    /// Provider-specific destination (phone, bank code and account, connected account).
    pub destination: String,
    pub provider: ProviderKind,
    pub status: PayoutStatus,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub approved_by: Option<UserId>,
    pub requested_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Payout {
    pub fn request(
        creator_id: UserId,
        amount: i64,
        currency: Currency,
        destination: String,
        provider: ProviderKind,
        now: Timestamp,
    ) -> Result<Self, ValidationError> {
        if destination.trim().is_empty() {
            return Err(ValidationError::empty_field("destination"));
        }
        Ok(Self {
            id: PayoutId::new(),
            creator_id,
            amount,
            currency,
            destination,
            provider,
            status: PayoutStatus::Requested,
            provider_reference: None,
            failure_reason: None,
            approved_by: None,
            requested_at: now,
            processed_at: None,
            updated_at: now,
        })
    }

    pub fn start_processing(&mut self, admin: UserId, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PayoutStatus::Processing)?;
        self.approved_by = Some(admin);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_paid(&mut self, provider_reference: String, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PayoutStatus::Paid)?;
        self.provider_reference = Some(provider_reference);
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PayoutStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Puts an in-flight payout back in the queue after an ambiguous provider result.
    pub fn revert_to_requested(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PayoutStatus::Requested)?;
        self.approved_by = None;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::assert_consistent;

    fn payout() -> Payout {
        Payout::request(
            UserId::new("creator-1").unwrap(),
            1000,
            Currency::new("KES").unwrap(),
            "254700000000".to_string(),
            ProviderKind::Mpesa,
            Timestamp::now(),
        )
        .unwrap()
    }

    #[test]
    fn status_machine_is_consistent() {
        assert_consistent(&[
            PayoutStatus::Requested,
            PayoutStatus::Processing,
            PayoutStatus::Paid,
            PayoutStatus::Failed,
        ]);
    }

    #[test]
    fn happy_path() {
        let mut p = payout();
        p.start_processing(UserId::new("admin").unwrap(), Timestamp::now()).unwrap();
        p.mark_paid("B2C_1".to_string(), Timestamp::now()).unwrap();
        assert_eq!(p.status, PayoutStatus::Paid);
        assert!(p.processed_at.is_some());
    }

    #[test]
    fn cannot_pay_without_approval() {
        let mut p = payout();
        assert!(p.mark_paid("x".to_string(), Timestamp::now()).is_err());
    }

    #[test]
    fn revert_returns_to_queue() {
        let mut p = payout();
        p.start_processing(UserId::new("admin").unwrap(), Timestamp::now()).unwrap();
        p.revert_to_requested(Timestamp::now()).unwrap();
        assert_eq!(p.status, PayoutStatus::Requested);
        assert!(p.approved_by.is_none());
    }

    #[test]
    fn destination_required() {
        assert!(Payout::request(
            UserId::new("c").unwrap(),
            1,
            Currency::new("USD").unwrap(),
            "".to_string(),
            ProviderKind::Stripe,
            Timestamp::now(),
        )
        .is_err());
    }
}
