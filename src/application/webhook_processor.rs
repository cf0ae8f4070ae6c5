//! Webhook event processor - applies canonical payment outcomes exactly once.
//!
//! ## Design
//!
//! Each event is applied in one transaction:
//! 1. Drop it if its idempotency key is already in the event log
//! 2. Load the payment by (provider, reference); unknown payments are logged, never fabricated
//! 3. Transition the payment, the subscription it belongs to, dunning state, and the wallet
//! 4. Append the event log row last, then commit
//!
//! Notifications collected along the way are sent after commit. Any error
//! rolls the whole transaction back so the provider's redelivery can retry.
//!
//! ## Race Condition Handling
//!
//! Concurrent deliveries of the same outcome serialize on the payment row;
//! the loser either sees the log row or gets `SaveResult::AlreadyExists`
//! on append and rolls back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::application::ledger_service::credit_in;
use crate::application::risk_engine::recompute_in;
use crate::application::settings::BillingSettings;
use crate::domain::dunning::{DunningOutcome, DunningStep};
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::payments::{
    BillingError, CanonicalEvent, CanonicalEventType, CanonicalStatus, Payment, PaymentEvent,
    PaymentPurpose, PaymentStatus, PAYMENT_METHOD_TOKEN_KEY,
};
use crate::domain::subscription::{CancellationReason, Subscription, SubscriptionStatus};
use crate::ports::{
    dispatch_all, BillingStore, BillingTransaction, Notification, NotificationKind, Notifier,
    SaveResult,
};

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Idempotency key already recorded.
    Duplicate,
    /// No payment matches the reference.
    UnknownPayment,
    /// Pending status; nothing to apply yet.
    Ignored,
    /// Success whose amount or currency disagrees with the payment. Logged only.
    AmountMismatch,
    /// The payment already reached this outcome through another event.
    AlreadyApplied,
    Activated,
    /// A second checkout for an active tier; the active one was extended.
    Superseded,
    Renewed,
    /// Success on a payment with no subscription to move.
    PaymentSucceeded,
    /// Money arrived for a cancelled subscription; credited, not reactivated.
    PaymentAfterCancellation,
    PaymentFailed,
    CheckoutFailed,
    /// Renewal failure that opened or advanced dunning.
    RenewalFailed,
    DunningExhausted,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Duplicate => "duplicate",
            ProcessOutcome::UnknownPayment => "unknown_payment",
            ProcessOutcome::Ignored => "ignored",
            ProcessOutcome::AmountMismatch => "amount_mismatch",
            ProcessOutcome::AlreadyApplied => "already_applied",
            ProcessOutcome::Activated => "activated",
            ProcessOutcome::Superseded => "superseded",
            ProcessOutcome::Renewed => "renewed",
            ProcessOutcome::PaymentSucceeded => "payment_succeeded",
            ProcessOutcome::PaymentAfterCancellation => "payment_after_cancellation",
            ProcessOutcome::PaymentFailed => "payment_failed",
            ProcessOutcome::CheckoutFailed => "checkout_failed",
            ProcessOutcome::RenewalFailed => "renewal_failed",
            ProcessOutcome::DunningExhausted => "dunning_exhausted",
        }
    }

    /// True when money was credited to a creator.
    pub fn credited(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::Activated
                | ProcessOutcome::Superseded
                | ProcessOutcome::Renewed
                | ProcessOutcome::PaymentSucceeded
                | ProcessOutcome::PaymentAfterCancellation
        )
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the event for a charge we initiated ourselves (renewal or dunning
/// retry), so it goes through the same gate as provider webhooks.
pub(crate) fn charge_outcome_event(
    payment: &Payment,
    status: CanonicalStatus,
    provider_reference: Option<&str>,
) -> CanonicalEvent {
    let mut metadata = BTreeMap::new();
    if let Some(provider_reference) = provider_reference {
        metadata.insert("provider_reference".to_string(), provider_reference.to_string());
    }
    CanonicalEvent {
        provider: payment.provider,
        event_type: CanonicalEventType::Subscription,
        event: format!("{}.charge", payment.purpose),
        provider_event_id: None,
        reference: payment.reference.clone(),
        status,
        amount: payment.amount,
        currency: payment.currency.clone(),
        metadata,
    }
}

pub struct WebhookEventProcessor {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn Notifier>,
    settings: BillingSettings,
}

impl WebhookEventProcessor {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn Notifier>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    /// Routes an event by its type.
    pub async fn process(&self, event: &CanonicalEvent) -> Result<ProcessOutcome, BillingError> {
        match event.event_type {
            CanonicalEventType::Payment => self.process_payment_event(event).await,
            CanonicalEventType::Subscription => self.process_renewal_event(event).await,
        }
    }

    pub async fn process_payment_event(
        &self,
        event: &CanonicalEvent,
    ) -> Result<ProcessOutcome, BillingError> {
        self.apply(event).await
    }

    /// Recurring-charge outcome. Shares the idempotency gate with
    /// [`Self::process_payment_event`]; what changes is decided by the
    /// payment's purpose, so a renewal success extends rather than activates.
    pub async fn process_renewal_event(
        &self,
        event: &CanonicalEvent,
    ) -> Result<ProcessOutcome, BillingError> {
        self.apply(event).await
    }

    async fn apply(&self, event: &CanonicalEvent) -> Result<ProcessOutcome, BillingError> {
        let key = event.idempotency_key();
        if event.status == CanonicalStatus::Pending {
            tracing::debug!(event_id = %key, event = %event.event, "pending event ignored");
            return Ok(ProcessOutcome::Ignored);
        }

        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;

        if tx.payment_event_exists(&key).await? {
            tracing::debug!(event_id = %key, "duplicate event dropped");
            return Ok(ProcessOutcome::Duplicate);
        }

        let mut payment = match tx.find_payment_for_update(event.provider, &event.reference).await? {
            Some(payment) => payment,
            None => {
                tracing::warn!(
                    provider = %event.provider,
                    reference = %event.reference,
                    event = %event.event,
                    "event for unknown payment"
                );
                return Ok(ProcessOutcome::UnknownPayment);
            }
        };

        let mut notifications = Vec::new();
        let outcome = match event.status {
            CanonicalStatus::Success => {
                self.apply_success(&mut *tx, event, &mut payment, &mut notifications, now)
                    .await?
            }
            CanonicalStatus::Failed => {
                self.apply_failure(&mut *tx, &mut payment, &mut notifications, now)
                    .await?
            }
            CanonicalStatus::Pending => ProcessOutcome::Ignored,
        };

        if outcome != ProcessOutcome::AmountMismatch {
            payment.record_webhook(&event.metadata, now);
            tx.update_payment(&payment).await?;
        }

        if tx.append_payment_event(&PaymentEvent::record(event, now)).await? == SaveResult::AlreadyExists {
            tx.rollback().await?;
            tracing::debug!(event_id = %key, "lost race on event log, dropped");
            return Ok(ProcessOutcome::Duplicate);
        }
        tx.commit().await?;

        tracing::info!(
            event_id = %key,
            provider = %event.provider,
            reference = %payment.reference,
            outcome = %outcome,
            "payment event applied"
        );

        if outcome.credited() {
            self.refresh_risk(&payment).await;
        }
        dispatch_all(self.notifier.as_ref(), notifications).await;
        Ok(outcome)
    }

    async fn apply_success(
        &self,
        tx: &mut dyn BillingTransaction,
        event: &CanonicalEvent,
        payment: &mut Payment,
        notifications: &mut Vec<Notification>,
        now: Timestamp,
    ) -> Result<ProcessOutcome, BillingError> {
        if !payment.matches_amount(event.amount, &event.currency) {
            tracing::error!(
                provider = %event.provider,
                reference = %payment.reference,
                expected_amount = payment.amount,
                expected_currency = %payment.currency,
                amount = event.amount,
                currency = %event.currency,
                "success event amount mismatch, needs manual reconciliation"
            );
            return Ok(ProcessOutcome::AmountMismatch);
        }
        if payment.status == PaymentStatus::Success {
            return Ok(ProcessOutcome::AlreadyApplied);
        }

        payment.mark_succeeded(now)?;
        let fees = match tx.current_fee_schedule().await? {
            Some(schedule) => schedule,
            None => self.settings.fees,
        };
        let share = fees.creator_share(payment.amount);
        credit_in(tx, &payment.creator_id, &payment.currency, share, now).await?;
        tracing::info!(
            reference = %payment.reference,
            amount = payment.amount,
            creator_share = share,
            fee_version = fees.version,
            "payment succeeded"
        );

        let Some(subscription_id) = payment.subscription_id else {
            return Ok(ProcessOutcome::PaymentSucceeded);
        };
        match payment.purpose {
            PaymentPurpose::Checkout => {
                self.activate_checkout(tx, event, subscription_id, notifications, now)
                    .await
            }
            PaymentPurpose::Renewal => {
                self.renew(tx, subscription_id, notifications, now).await
            }
        }
    }

    async fn activate_checkout(
        &self,
        tx: &mut dyn BillingTransaction,
        event: &CanonicalEvent,
        subscription_id: SubscriptionId,
        notifications: &mut Vec<Notification>,
        now: Timestamp,
    ) -> Result<ProcessOutcome, BillingError> {
        let mut subscription = tx
            .find_subscription_for_update(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("Subscription"))?;

        match subscription.status {
            SubscriptionStatus::Pending => {}
            SubscriptionStatus::Active => return Ok(ProcessOutcome::AlreadyApplied),
            SubscriptionStatus::Cancelled => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    "payment arrived for cancelled subscription"
                );
                notifications.push(Notification::new(
                    subscription.fan_id.clone(),
                    NotificationKind::PaymentAfterCancellation {
                        subscription_id: subscription.id,
                    },
                ));
                return Ok(ProcessOutcome::PaymentAfterCancellation);
            }
        }

        let active = tx
            .find_active_subscription(
                &subscription.fan_id,
                &subscription.creator_id,
                &subscription.tier_name,
            )
            .await?;
        if let Some(mut active) = active.filter(|a| a.id != subscription.id) {
            active.extend(self.settings.billing_period_days, now)?;
            subscription.cancel(CancellationReason::Superseded, now)?;
            tx.update_subscription(&active).await?;
            tx.update_subscription(&subscription).await?;
            tracing::info!(
                subscription_id = %active.id,
                superseded = %subscription.id,
                "duplicate checkout folded into active subscription"
            );
            notifications.push(Notification::new(
                active.fan_id.clone(),
                NotificationKind::RenewalSucceeded {
                    subscription_id: active.id,
                },
            ));
            return Ok(ProcessOutcome::Superseded);
        }

        let token = event
            .metadata_value(PAYMENT_METHOD_TOKEN_KEY)
            .map(str::to_string);
        subscription.activate(now, self.settings.billing_period_days, token)?;
        tx.update_subscription(&subscription).await?;
        tracing::info!(subscription_id = %subscription.id, "subscription activated");
        notifications.push(Notification::new(
            subscription.fan_id.clone(),
            NotificationKind::SubscriptionActivated {
                subscription_id: subscription.id,
            },
        ));
        Ok(ProcessOutcome::Activated)
    }

    async fn renew(
        &self,
        tx: &mut dyn BillingTransaction,
        subscription_id: SubscriptionId,
        notifications: &mut Vec<Notification>,
        now: Timestamp,
    ) -> Result<ProcessOutcome, BillingError> {
        let mut subscription = tx
            .find_subscription_for_update(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("Subscription"))?;

        if subscription.status != SubscriptionStatus::Active {
            tracing::warn!(
                subscription_id = %subscription.id,
                status = %subscription.status,
                "renewal payment for inactive subscription"
            );
            notifications.push(Notification::new(
                subscription.fan_id.clone(),
                NotificationKind::PaymentAfterCancellation {
                    subscription_id: subscription.id,
                },
            ));
            return Ok(ProcessOutcome::PaymentAfterCancellation);
        }

        subscription.extend(self.settings.billing_period_days, now)?;
        tx.update_subscription(&subscription).await?;

        if let Some(mut attempt) = tx.find_open_dunning_attempt(subscription.id).await? {
            attempt.resolve(DunningOutcome::Succeeded, now)?;
            tx.update_dunning_attempt(&attempt).await?;
            tracing::info!(
                subscription_id = %subscription.id,
                attempt = attempt.attempt_number,
                "dunning resolved by successful renewal"
            );
        }

        tracing::info!(
            subscription_id = %subscription.id,
            end_date = ?subscription.end_date,
            "subscription renewed"
        );
        notifications.push(Notification::new(
            subscription.fan_id.clone(),
            NotificationKind::RenewalSucceeded {
                subscription_id: subscription.id,
            },
        ));
        Ok(ProcessOutcome::Renewed)
    }

    async fn apply_failure(
        &self,
        tx: &mut dyn BillingTransaction,
        payment: &mut Payment,
        notifications: &mut Vec<Notification>,
        now: Timestamp,
    ) -> Result<ProcessOutcome, BillingError> {
        if payment.status != PaymentStatus::Pending {
            return Ok(ProcessOutcome::AlreadyApplied);
        }
        payment.mark_failed(now)?;
        tracing::info!(reference = %payment.reference, purpose = %payment.purpose, "payment failed");

        let Some(subscription_id) = payment.subscription_id else {
            return Ok(ProcessOutcome::PaymentFailed);
        };
        let mut subscription = tx
            .find_subscription_for_update(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("Subscription"))?;

        match (payment.purpose, subscription.status) {
            (PaymentPurpose::Checkout, SubscriptionStatus::Pending) => {
                subscription.cancel(CancellationReason::PaymentFailed, now)?;
                tx.update_subscription(&subscription).await?;
                tracing::info!(subscription_id = %subscription.id, "checkout failed, subscription cancelled");
                notifications.push(Notification::new(
                    subscription.fan_id.clone(),
                    NotificationKind::SubscriptionCancelled {
                        subscription_id: subscription.id,
                        reason: CancellationReason::PaymentFailed,
                    },
                ));
                Ok(ProcessOutcome::CheckoutFailed)
            }
            (PaymentPurpose::Renewal, SubscriptionStatus::Active) => {
                self.advance_dunning(tx, payment, &mut subscription, notifications, now)
                    .await
            }
            _ => Ok(ProcessOutcome::PaymentFailed),
        }
    }

    /// Opens dunning on the first renewal failure, or advances it when the
    /// failed payment is the open attempt's own charge.
    async fn advance_dunning(
        &self,
        tx: &mut dyn BillingTransaction,
        payment: &Payment,
        subscription: &mut Subscription,
        notifications: &mut Vec<Notification>,
        now: Timestamp,
    ) -> Result<ProcessOutcome, BillingError> {
        let policy = &self.settings.dunning;

        let Some(mut open) = tx.find_open_dunning_attempt(subscription.id).await? else {
            let first = policy.first_attempt(subscription.id, now);
            tx.insert_dunning_attempt(&first).await?;
            subscription.release_claim(now);
            tx.update_subscription(subscription).await?;
            tracing::info!(
                subscription_id = %subscription.id,
                attempt = first.attempt_number,
                scheduled_at = %first.scheduled_at,
                "renewal failed, dunning scheduled"
            );
            notifications.push(Notification::new(
                subscription.fan_id.clone(),
                NotificationKind::RenewalFailed {
                    subscription_id: subscription.id,
                    attempt: first.attempt_number,
                    next_retry_at: first.scheduled_at,
                },
            ));
            return Ok(ProcessOutcome::RenewalFailed);
        };

        if open.payment_reference.as_deref() != Some(payment.reference.as_str()) {
            tracing::info!(
                subscription_id = %subscription.id,
                attempt = open.attempt_number,
                reference = %payment.reference,
                "stale renewal failure, dunning not advanced"
            );
            return Ok(ProcessOutcome::PaymentFailed);
        }

        match policy.after_failure(&mut open, now)? {
            DunningStep::Retry(next) => {
                tx.update_dunning_attempt(&open).await?;
                tx.insert_dunning_attempt(&next).await?;
                tracing::info!(
                    subscription_id = %subscription.id,
                    attempt = next.attempt_number,
                    scheduled_at = %next.scheduled_at,
                    "dunning retry scheduled"
                );
                notifications.push(Notification::new(
                    subscription.fan_id.clone(),
                    NotificationKind::RenewalFailed {
                        subscription_id: subscription.id,
                        attempt: next.attempt_number,
                        next_retry_at: next.scheduled_at,
                    },
                ));
                Ok(ProcessOutcome::RenewalFailed)
            }
            DunningStep::Exhausted => {
                tx.update_dunning_attempt(&open).await?;
                subscription.cancel(CancellationReason::DunningExhausted, now)?;
                tx.update_subscription(subscription).await?;
                tracing::info!(
                    subscription_id = %subscription.id,
                    attempt = open.attempt_number,
                    "dunning exhausted, subscription cancelled"
                );
                notifications.push(Notification::new(
                    subscription.fan_id.clone(),
                    NotificationKind::SubscriptionCancelled {
                        subscription_id: subscription.id,
                        reason: CancellationReason::DunningExhausted,
                    },
                ));
                Ok(ProcessOutcome::DunningExhausted)
            }
        }
    }

    /// Risk runs after commit; a failure here never undoes the payment.
    async fn refresh_risk(&self, payment: &Payment) {
        let result = async {
            let mut tx = self.store.begin().await?;
            recompute_in(&mut *tx, &payment.creator_id, Timestamp::now()).await?;
            tx.commit().await?;
            Ok::<_, BillingError>(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(creator_id = %payment.creator_id, error = %err, "risk recompute failed");
        }
    }
}
