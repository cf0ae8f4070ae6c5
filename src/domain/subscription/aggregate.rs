//! Subscription aggregate.
//!
//! A fan holds at most one active subscription per (creator, tier). The
//! aggregate enforces its own transitions; the "one active" rule spans
//! rows and is enforced by the webhook processor inside its transaction.

use serde::{Deserialize, Serialize};

use super::{CancellationReason, SubscriptionStatus};
use crate::domain::foundation::{
    Currency, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};
use crate::domain::payments::ProviderKind;

/// Input for creating a pending subscription at checkout.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub fan_id: UserId,
    pub creator_id: UserId,
    pub tier_name: String,
    pub tier_price: i64,
    pub currency: Currency,
    pub payment_provider: ProviderKind,
    pub payment_reference: String,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub fan_id: UserId,
    pub creator_id: UserId,
    pub tier_name: String,
    /// Minor units per billing period.
    pub tier_price: i64,
    pub currency: Currency,
    pub status: SubscriptionStatus,
    pub start_date: Option<Timestamp>,
    pub end_date: Option<Timestamp>,
    pub payment_provider: ProviderKind,
    /// Reference of the payment that last activated or renewed this row.
    pub payment_reference: String,
    /// Provider token for off-session renewal charges.
    pub payment_method_token: Option<String>,
    pub auto_renew: bool,
    pub cancellation_reason: Option<CancellationReason>,
    pub cancelled_at: Option<Timestamp>,
    /// Renewal claim held by a scanner run; expires on its own.
    pub renewal_claimed_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    pub fn pending(input: NewSubscription, now: Timestamp) -> Result<Self, ValidationError> {
        if input.tier_name.trim().is_empty() {
            return Err(ValidationError::empty_field("tier_name"));
        }
        if input.tier_price <= 0 {
            return Err(ValidationError::out_of_range(
                "tier_price",
                1,
                i64::MAX,
                input.tier_price,
            ));
        }
        if input.fan_id == input.creator_id {
            return Err(ValidationError::invalid_format(
                "creator_id",
                "creators cannot subscribe to themselves",
            ));
        }
        Ok(Self {
            id: SubscriptionId::new(),
            fan_id: input.fan_id,
            creator_id: input.creator_id,
            tier_name: input.tier_name,
            tier_price: input.tier_price,
            currency: input.currency,
            status: SubscriptionStatus::Pending,
            start_date: None,
            end_date: None,
            payment_provider: input.payment_provider,
            payment_reference: input.payment_reference,
            payment_method_token: None,
            auto_renew: input.auto_renew,
            cancellation_reason: None,
            cancelled_at: None,
            renewal_claimed_until: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Pending -> Active, starting a fresh billing period at `now`.
    pub fn activate(
        &mut self,
        now: Timestamp,
        period_days: i64,
        payment_method_token: Option<String>,
    ) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(SubscriptionStatus::Active)?;
        self.start_date = Some(now);
        self.end_date = Some(now.add_days(period_days));
        if payment_method_token.is_some() {
            self.payment_method_token = payment_method_token;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Extends an active subscription's end date by one period.
    ///
    /// The new period is anchored on the previous end date, never on `now`.
    pub fn extend(&mut self, period_days: i64, now: Timestamp) -> Result<(), ValidationError> {
        if self.status != SubscriptionStatus::Active {
            return Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot renew a {} subscription", self.status),
            ));
        }
        let end = self
            .end_date
            .ok_or_else(|| ValidationError::empty_field("end_date"))?;
        self.end_date = Some(end.add_days(period_days));
        self.renewal_claimed_until = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, reason: CancellationReason, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(SubscriptionStatus::Cancelled)?;
        self.auto_renew = false;
        self.cancellation_reason = Some(reason);
        self.cancelled_at = Some(now);
        self.renewal_claimed_until = None;
        self.updated_at = now;
        Ok(())
    }

    /// Active, auto-renewing, and at or past its end date.
    pub fn is_due_for_renewal(&self, now: Timestamp) -> bool {
        self.is_active()
            && self.auto_renew
            && self.end_date.map(|end| !end.is_after(&now)).unwrap_or(false)
    }

    /// Active, not renewing, and past its end date.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.is_active()
            && !self.auto_renew
            && self.end_date.map(|end| end.is_before(&now)).unwrap_or(false)
    }

    /// Pending for longer than the checkout timeout.
    pub fn is_stale_checkout(&self, now: Timestamp, timeout_hours: i64) -> bool {
        self.status == SubscriptionStatus::Pending
            && !self.created_at.add_hours(timeout_hours).is_after(&now)
    }

    /// True if another runner holds an unexpired renewal claim.
    pub fn is_claimed(&self, now: Timestamp) -> bool {
        self.renewal_claimed_until
            .map(|until| until.is_after(&now))
            .unwrap_or(false)
    }

    pub fn release_claim(&mut self, now: Timestamp) {
        self.renewal_claimed_until = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: i64 = 30;

    fn new_sub(auto_renew: bool) -> Subscription {
        Subscription::pending(
            NewSubscription {
                fan_id: UserId::new("fan-1").unwrap(),
                creator_id: UserId::new("creator-1").unwrap(),
                tier_name: "gold".to_string(),
                tier_price: 5000,
                currency: Currency::new("USD").unwrap(),
                payment_provider: ProviderKind::Stripe,
                payment_reference: "ref-1".to_string(),
                auto_renew,
            },
            Timestamp::now(),
        )
        .unwrap()
    }

    #[test]
    fn activation_sets_period() {
        let mut sub = new_sub(true);
        let now = Timestamp::now();
        sub.activate(now, PERIOD, Some("pm_1".into())).unwrap();
        assert!(sub.is_active());
        assert_eq!(sub.start_date, Some(now));
        assert_eq!(sub.end_date, Some(now.add_days(PERIOD)));
        assert_eq!(sub.payment_method_token.as_deref(), Some("pm_1"));
    }

    #[test]
    fn cannot_activate_twice() {
        let mut sub = new_sub(true);
        sub.activate(Timestamp::now(), PERIOD, None).unwrap();
        assert!(sub.activate(Timestamp::now(), PERIOD, None).is_err());
    }

    #[test]
    fn extend_anchors_on_previous_end_date() {
        let mut sub = new_sub(true);
        let start = Timestamp::now().minus_days(40);
        sub.activate(start, PERIOD, None).unwrap();
        let before = sub.end_date.unwrap();
        sub.extend(PERIOD, Timestamp::now()).unwrap();
        assert_eq!(sub.end_date, Some(before.add_days(PERIOD)));
        assert!(sub.is_active());
    }

    #[test]
    fn extend_rejects_pending() {
        let mut sub = new_sub(true);
        assert!(sub.extend(PERIOD, Timestamp::now()).is_err());
    }

    #[test]
    fn cancel_records_reason_and_disables_renewal() {
        let mut sub = new_sub(true);
        sub.activate(Timestamp::now(), PERIOD, None).unwrap();
        sub.cancel(CancellationReason::UserRequested, Timestamp::now()).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert!(!sub.auto_renew);
        assert_eq!(sub.cancellation_reason, Some(CancellationReason::UserRequested));
        assert!(sub.cancel(CancellationReason::Expired, Timestamp::now()).is_err());
    }

    #[test]
    fn due_for_renewal_requires_auto_renew_and_past_end() {
        let now = Timestamp::now();
        let mut sub = new_sub(true);
        sub.activate(now.minus_days(31), PERIOD, None).unwrap();
        assert!(sub.is_due_for_renewal(now));
        assert!(!sub.is_expired(now));

        let mut manual = new_sub(false);
        manual.activate(now.minus_days(31), PERIOD, None).unwrap();
        assert!(!manual.is_due_for_renewal(now));
        assert!(manual.is_expired(now));
    }

    #[test]
    fn stale_checkout_detection() {
        let sub = new_sub(true);
        let later = sub.created_at.add_hours(25);
        assert!(sub.is_stale_checkout(later, 24));
        assert!(!sub.is_stale_checkout(sub.created_at.add_hours(1), 24));
    }

    #[test]
    fn claim_expires() {
        let now = Timestamp::now();
        let mut sub = new_sub(true);
        sub.renewal_claimed_until = Some(now.add_secs(60));
        assert!(sub.is_claimed(now));
        assert!(!sub.is_claimed(now.add_secs(61)));
        sub.release_claim(now);
        assert!(!sub.is_claimed(now));
    }

    #[test]
    fn rejects_self_subscription() {
        let result = Subscription::pending(
            NewSubscription {
                fan_id: UserId::new("same").unwrap(),
                creator_id: UserId::new("same").unwrap(),
                tier_name: "gold".to_string(),
                tier_price: 100,
                currency: Currency::new("USD").unwrap(),
                payment_provider: ProviderKind::Stripe,
                payment_reference: "r".to_string(),
                auto_renew: true,
            },
            Timestamp::now(),
        );
        assert!(result.is_err());
    }
}
