//! Retry schedule for failed renewals.

use serde::{Deserialize, Serialize};

use super::{DunningAttempt, DunningOutcome};
use crate::domain::foundation::{SubscriptionId, Timestamp, ValidationError};

/// Backoff curve and attempt ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDunningPolicy")]
pub struct DunningPolicy {
    backoff_days: Vec<u32>,
    max_attempts: u32,
}

/// Unchecked wire form; deserialization goes through `DunningPolicy::new`.
#[derive(Deserialize)]
struct RawDunningPolicy {
    backoff_days: Vec<u32>,
    max_attempts: u32,
}

impl TryFrom<RawDunningPolicy> for DunningPolicy {
    type Error = ValidationError;

    fn try_from(raw: RawDunningPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.backoff_days, raw.max_attempts)
    }
}

/// What happens after an attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DunningStep {
    /// The failed attempt closes as `Failed` and this one is scheduled.
    Retry(DunningAttempt),
    /// The failed attempt was the last; it closes as `Exhausted`.
    Exhausted,
}

impl DunningPolicy {
    pub fn new(backoff_days: Vec<u32>, max_attempts: u32) -> Result<Self, ValidationError> {
        if backoff_days.is_empty() {
            return Err(ValidationError::empty_field("backoff_days"));
        }
        if max_attempts == 0 {
            return Err(ValidationError::out_of_range("max_attempts", 1, 100, 0));
        }
        Ok(Self {
            backoff_days,
            max_attempts,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Days to wait before attempt `attempt_number` (1-based).
    ///
    /// Attempts beyond the curve reuse its last step.
    pub fn delay_days(&self, attempt_number: u32) -> i64 {
        let idx = (attempt_number.max(1) - 1) as usize;
        let last = self.backoff_days.len() - 1;
        self.backoff_days[idx.min(last)] as i64
    }

    /// Attempt #1, scheduled after the initial renewal charge failed.
    pub fn first_attempt(&self, subscription_id: SubscriptionId, now: Timestamp) -> DunningAttempt {
        DunningAttempt::scheduled(subscription_id, 1, now.add_days(self.delay_days(1)), now)
    }

    /// Decides the follow-up to a failed attempt and closes it.
    pub fn after_failure(
        &self,
        failed: &mut DunningAttempt,
        now: Timestamp,
    ) -> Result<DunningStep, ValidationError> {
        if failed.attempt_number >= self.max_attempts {
            failed.resolve(DunningOutcome::Exhausted, now)?;
            return Ok(DunningStep::Exhausted);
        }
        failed.resolve(DunningOutcome::Failed, now)?;
        let next = failed.attempt_number + 1;
        Ok(DunningStep::Retry(DunningAttempt::scheduled(
            failed.subscription_id,
            next,
            now.add_days(self.delay_days(next)),
            now,
        )))
    }
}

impl Default for DunningPolicy {
    fn default() -> Self {
        Self {
            backoff_days: vec![1, 3, 7],
            max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn deserializing_rejects_an_empty_curve() {
        let empty = serde_json::from_str::<DunningPolicy>(r#"{"backoff_days":[],"max_attempts":3}"#);
        let zero = serde_json::from_str::<DunningPolicy>(r#"{"backoff_days":[1],"max_attempts":0}"#);

        assert!(empty.is_err());
        assert!(zero.is_err());
    }

    #[test]
    fn deserializing_a_valid_curve_matches_new() {
        let policy: DunningPolicy =
            serde_json::from_str(r#"{"backoff_days":[2,4],"max_attempts":5}"#).unwrap();

        assert_eq!(policy, DunningPolicy::new(vec![2, 4], 5).unwrap());
    }

    #[test]
    fn default_curve_is_one_three_seven() {
        let policy = DunningPolicy::default();
        assert_eq!(policy.delay_days(1), 1);
        assert_eq!(policy.delay_days(2), 3);
        assert_eq!(policy.delay_days(3), 7);
        assert_eq!(policy.delay_days(9), 7);
    }

    #[test]
    fn first_attempt_is_number_one() {
        let now = Timestamp::now();
        let attempt = DunningPolicy::default().first_attempt(SubscriptionId::new(), now);
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.scheduled_at, now.add_days(1));
        assert!(attempt.is_open());
    }

    #[test]
    fn failure_below_max_schedules_next() {
        let policy = DunningPolicy::default();
        let now = Timestamp::now();
        let mut first = policy.first_attempt(SubscriptionId::new(), now);
        match policy.after_failure(&mut first, now).unwrap() {
            DunningStep::Retry(next) => {
                assert_eq!(next.attempt_number, 2);
                assert_eq!(next.scheduled_at, now.add_days(3));
            }
            DunningStep::Exhausted => panic!("should retry"),
        }
        assert_eq!(first.outcome, DunningOutcome::Failed);
    }

    #[test]
    fn failure_at_max_exhausts() {
        let policy = DunningPolicy::new(vec![1], 1).unwrap();
        let now = Timestamp::now();
        let mut first = policy.first_attempt(SubscriptionId::new(), now);
        assert_eq!(policy.after_failure(&mut first, now).unwrap(), DunningStep::Exhausted);
        assert_eq!(first.outcome, DunningOutcome::Exhausted);
    }

    #[test]
    fn rejects_degenerate_policies() {
        assert!(DunningPolicy::new(vec![], 3).is_err());
        assert!(DunningPolicy::new(vec![1], 0).is_err());
    }

    proptest! {
        #[test]
        fn attempts_never_exceed_max(max in 1u32..10, curve in proptest::collection::vec(0u32..30, 1..5)) {
            let policy = DunningPolicy::new(curve, max).unwrap();
            let now = Timestamp::now();
            let mut current = policy.first_attempt(SubscriptionId::new(), now);
            let mut seen = 1;
            loop {
                match policy.after_failure(&mut current, now).unwrap() {
                    DunningStep::Retry(next) => {
                        prop_assert_eq!(next.attempt_number, current.attempt_number + 1);
                        current = next;
                        seen += 1;
                    }
                    DunningStep::Exhausted => break,
                }
            }
            prop_assert_eq!(seen, max);
            prop_assert!(current.attempt_number <= max);
        }
    }
}
