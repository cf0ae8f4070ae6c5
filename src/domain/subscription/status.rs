//! Subscription status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Created at checkout, waiting for the first payment.
    Pending,
    Active,
    Cancelled,
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Pending, Active) | (Pending, Cancelled) | (Active, Cancelled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Pending => vec![Active, Cancelled],
            Active => vec![Cancelled],
            Cancelled => vec![],
        }
    }
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(ValidationError::invalid_format("subscription_status", other)),
        }
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    UserRequested,
    PaymentFailed,
    CheckoutTimeout,
    Expired,
    DunningExhausted,
    /// A second checkout for the same tier was folded into the active one.
    Superseded,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::UserRequested => "user_requested",
            CancellationReason::PaymentFailed => "payment_failed",
            CancellationReason::CheckoutTimeout => "checkout_timeout",
            CancellationReason::Expired => "expired",
            CancellationReason::DunningExhausted => "dunning_exhausted",
            CancellationReason::Superseded => "superseded",
        }
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancellationReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_requested" => Ok(CancellationReason::UserRequested),
            "payment_failed" => Ok(CancellationReason::PaymentFailed),
            "checkout_timeout" => Ok(CancellationReason::CheckoutTimeout),
            "expired" => Ok(CancellationReason::Expired),
            "dunning_exhausted" => Ok(CancellationReason::DunningExhausted),
            "superseded" => Ok(CancellationReason::Superseded),
            other => Err(ValidationError::invalid_format("cancellation_reason", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::assert_consistent;

    #[test]
    fn transitions_are_consistent() {
        assert_consistent(&[
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
        ]);
    }

    #[test]
    fn cancelled_is_terminal() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn active_cannot_return_to_pending() {
        assert!(SubscriptionStatus::Active
            .transition_to(SubscriptionStatus::Pending)
            .is_err());
    }

    #[test]
    fn reasons_parse_back() {
        for r in [
            CancellationReason::UserRequested,
            CancellationReason::DunningExhausted,
            CancellationReason::Superseded,
        ] {
            assert_eq!(r.as_str().parse::<CancellationReason>().unwrap(), r);
        }
    }
}
