//! A single scheduled retry of a failed renewal charge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{
    DunningAttemptId, StateMachine, SubscriptionId, Timestamp, ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DunningOutcome {
    /// Scheduled, not yet resolved.
    Pending,
    Succeeded,
    /// Charge failed and a later attempt was scheduled.
    Failed,
    /// Charge failed on the last allowed attempt.
    Exhausted,
}

impl StateMachine for DunningOutcome {
    fn can_transition_to(&self, target: &Self) -> bool {
        use DunningOutcome::*;
        matches!(
            (self, target),
            (Pending, Succeeded) | (Pending, Failed) | (Pending, Exhausted)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use DunningOutcome::*;
        match self {
            Pending => vec![Succeeded, Failed, Exhausted],
            Succeeded | Failed | Exhausted => vec![],
        }
    }
}

impl DunningOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DunningOutcome::Pending => "pending",
            DunningOutcome::Succeeded => "succeeded",
            DunningOutcome::Failed => "failed",
            DunningOutcome::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for DunningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DunningOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DunningOutcome::Pending),
            "succeeded" => Ok(DunningOutcome::Succeeded),
            "failed" => Ok(DunningOutcome::Failed),
            "exhausted" => Ok(DunningOutcome::Exhausted),
            other => Err(ValidationError::invalid_format("dunning_outcome", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningAttempt {
    pub id: DunningAttemptId,
    pub subscription_id: SubscriptionId,
    /// 1-based, strictly increasing per subscription.
    pub attempt_number: u32,
    pub scheduled_at: Timestamp,
    pub outcome: DunningOutcome,
    /// Reference of the retry charge once one has been created.
    pub payment_reference: Option<String>,
    pub claimed_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DunningAttempt {
    pub(super) fn scheduled(
        subscription_id: SubscriptionId,
        attempt_number: u32,
        scheduled_at: Timestamp,
        now: Timestamp,
    ) -> Self {
        Self {
            id: DunningAttemptId::new(),
            subscription_id,
            attempt_number,
            scheduled_at,
            outcome: DunningOutcome::Pending,
            payment_reference: None,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome == DunningOutcome::Pending
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.is_open() && !self.scheduled_at.is_after(&now)
    }

    pub fn is_claimed(&self, now: Timestamp) -> bool {
        self.claimed_until
            .map(|until| until.is_after(&now))
            .unwrap_or(false)
    }

    pub fn release_claim(&mut self, now: Timestamp) {
        self.claimed_until = None;
        self.updated_at = now;
    }

    pub fn resolve(&mut self, outcome: DunningOutcome, now: Timestamp) -> Result<(), ValidationError> {
        self.outcome = self.outcome.transition_to(outcome)?;
        self.claimed_until = None;
        self.updated_at = now;
        Ok(())
    }
}
