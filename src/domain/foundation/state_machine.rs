//! State machine trait for status enums.
//!
//! Payment, subscription, dunning, payout and chargeback statuses all
//! implement this so transitions are validated in one place.

use super::ValidationError;

/// Trait for status enums that represent state machines.
///
/// ```ignore
/// let next = SubscriptionStatus::Pending.transition_to(SubscriptionStatus::Active)?;
/// ```
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation, returning error if invalid.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

/// Asserts `can_transition_to` agrees with `valid_transitions` for every state.
#[cfg(test)]
pub(crate) fn assert_consistent<S: StateMachine>(all: &[S]) {
    for from in all {
        for to in all {
            let listed = from.valid_transitions().contains(to);
            assert_eq!(
                from.can_transition_to(to),
                listed,
                "{:?} -> {:?} disagrees with valid_transitions",
                from,
                to
            );
        }
    }
}
