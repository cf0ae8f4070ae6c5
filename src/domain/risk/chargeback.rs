//! Disputed charges raised against a creator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{
    ChargebackId, Currency, StateMachine, Timestamp, UserId, ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargebackStatus {
    Open,
    Won,
    Lost,
}

impl StateMachine for ChargebackStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use ChargebackStatus::*;
        matches!((self, target), (Open, Won) | (Open, Lost))
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use ChargebackStatus::*;
        match self {
            Open => vec![Won, Lost],
            Won | Lost => vec![],
        }
    }
}

impl ChargebackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargebackStatus::Open => "open",
            ChargebackStatus::Won => "won",
            ChargebackStatus::Lost => "lost",
        }
    }
}

impl fmt::Display for ChargebackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChargebackStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ChargebackStatus::Open),
            "won" => Ok(ChargebackStatus::Won),
            "lost" => Ok(ChargebackStatus::Lost),
            other => Err(ValidationError::invalid_format("chargeback_status", other)),
        }
    }
}

/// Admin decision on a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargebackResolution {
    Won,
    Lost,
}

impl From<ChargebackResolution> for ChargebackStatus {
    fn from(r: ChargebackResolution) -> Self {
        match r {
            ChargebackResolution::Won => ChargebackStatus::Won,
            ChargebackResolution::Lost => ChargebackStatus::Lost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chargeback {
    pub id: ChargebackId,
    /// Fan who disputed the charge.
    pub user_id: UserId,
    pub creator_id: UserId,
    /// Reference of the disputed payment.
    pub payment_reference: String,
    pub amount: i64,
    pub currency: Currency,
    pub status: ChargebackStatus,
    pub reason: Option<String>,
    pub opened_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
    pub resolved_by: Option<UserId>,
}

impl Chargeback {
    pub fn open(
        user_id: UserId,
        creator_id: UserId,
        payment_reference: String,
        amount: i64,
        currency: Currency,
        reason: Option<String>,
        now: Timestamp,
    ) -> Result<Self, ValidationError> {
        if amount <= 0 {
            return Err(ValidationError::out_of_range("amount", 1, i64::MAX, amount));
        }
        Ok(Self {
            id: ChargebackId::new(),
            user_id,
            creator_id,
            payment_reference,
            amount,
            currency,
            status: ChargebackStatus::Open,
            reason,
            opened_at: now,
            resolved_at: None,
            resolved_by: None,
        })
    }

    /// One-way transition out of `Open`.
    pub fn resolve(
        &mut self,
        resolution: ChargebackResolution,
        admin: UserId,
        now: Timestamp,
    ) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(resolution.into())?;
        self.resolved_at = Some(now);
        self.resolved_by = Some(admin);
        Ok(())
    }
}
