//! Subscription lifecycle - renewal scan, expiry, stale checkouts, and
//! explicit cancellation.
//!
//! ## Race Condition Handling
//!
//! The scan may run concurrently with itself and with live webhooks. Each
//! subscription is claimed with a conditional update before any charge; a
//! runner that loses the claim skips it. Charge outcomes go through the
//! webhook processor, whose idempotency gate absorbs a racing webhook.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::application::renewal_charge::{ChargeOutcome, RenewalCharger};
use crate::application::settings::BillingSettings;
use crate::application::webhook_processor::{ProcessOutcome, WebhookEventProcessor};
use crate::domain::dunning::DunningOutcome;
use crate::domain::foundation::{AuthenticatedUser, SubscriptionId, Timestamp};
use crate::domain::payments::{BillingError, NewPayment, Payment, PaymentPurpose};
use crate::domain::subscription::{CancellationReason, Subscription, SubscriptionStatus};
use crate::ports::{
    dispatch_all, BillingStore, Notification, NotificationKind, Notifier, PaymentRouter,
};

/// Counts from one renewal scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenewalScanReport {
    pub due: usize,
    /// Claimed by another runner.
    pub skipped: usize,
    pub renewed: usize,
    /// Charge failed; dunning opened.
    pub failed: usize,
    /// Outcome unknown; reconciled on a later scan.
    pub unresolved: usize,
    pub expired: usize,
    pub abandoned_checkouts: usize,
    pub errors: usize,
}

enum RenewalStep {
    Skipped,
    Renewed,
    Failed,
    Unresolved,
    /// Settled by a concurrent webhook or a no-op.
    Other,
}

pub struct SubscriptionLifecycleManager {
    store: Arc<dyn BillingStore>,
    router: Arc<dyn PaymentRouter>,
    notifier: Arc<dyn Notifier>,
    charger: RenewalCharger,
    settings: BillingSettings,
}

impl SubscriptionLifecycleManager {
    pub fn new(
        store: Arc<dyn BillingStore>,
        router: Arc<dyn PaymentRouter>,
        processor: Arc<WebhookEventProcessor>,
        notifier: Arc<dyn Notifier>,
        settings: BillingSettings,
    ) -> Self {
        let charger = RenewalCharger::new(
            store.clone(),
            router.clone(),
            processor,
            settings.clone(),
        );
        Self {
            store,
            router,
            notifier,
            charger,
            settings,
        }
    }

    /// One pass of the periodic sweep. Safe to run in overlapping windows.
    pub async fn run_renewal_scan(&self) -> Result<RenewalScanReport, BillingError> {
        let mut report = RenewalScanReport::default();
        let now = Timestamp::now();
        let batch = self.settings.scan_batch_size;

        let (due, expired, stale) = {
            let mut tx = self.store.begin().await?;
            let due = tx.list_due_for_renewal(now, batch).await?;
            let expired = tx.list_expired(now, batch).await?;
            let cutoff = now.add_hours(-self.settings.pending_checkout_timeout_hours);
            let stale = tx.list_stale_checkouts(cutoff, batch).await?;
            tx.rollback().await?;
            (due, expired, stale)
        };
        report.due = due.len();

        for id in due {
            match self.renew_one(id).await {
                Ok(RenewalStep::Skipped) => report.skipped += 1,
                Ok(RenewalStep::Renewed) => report.renewed += 1,
                Ok(RenewalStep::Failed) => report.failed += 1,
                Ok(RenewalStep::Unresolved) => report.unresolved += 1,
                Ok(RenewalStep::Other) => {}
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(subscription_id = %id, error = %err, "renewal failed to run");
                }
            }
        }

        for id in expired {
            match self.close_if(id, CancellationReason::Expired).await {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(subscription_id = %id, error = %err, "expiry failed");
                }
            }
        }

        for id in stale {
            match self.close_if(id, CancellationReason::CheckoutTimeout).await {
                Ok(true) => report.abandoned_checkouts += 1,
                Ok(false) => {}
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(subscription_id = %id, error = %err, "checkout timeout failed");
                }
            }
        }

        tracing::info!(
            due = report.due,
            renewed = report.renewed,
            failed = report.failed,
            unresolved = report.unresolved,
            skipped = report.skipped,
            expired = report.expired,
            abandoned_checkouts = report.abandoned_checkouts,
            errors = report.errors,
            "renewal scan finished"
        );
        Ok(report)
    }

    async fn renew_one(&self, id: SubscriptionId) -> Result<RenewalStep, BillingError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        if !tx
            .claim_subscription_for_renewal(id, now, self.settings.claim_until(now))
            .await?
        {
            tracing::debug!(subscription_id = %id, "renewal claimed elsewhere");
            return Ok(RenewalStep::Skipped);
        }
        let subscription = tx
            .find_subscription_for_update(id)
            .await?
            .ok_or(BillingError::NotFound("Subscription"))?;

        let (payment, reconcile) = match tx.find_pending_payment(id, PaymentPurpose::Renewal).await? {
            Some(payment) => (payment, true),
            None => {
                let payment = Payment::new(
                    NewPayment {
                        payer_id: subscription.fan_id.clone(),
                        creator_id: subscription.creator_id.clone(),
                        amount: subscription.tier_price,
                        currency: subscription.currency.clone(),
                        provider: subscription.payment_provider,
                        reference: format!("ren-{}", Uuid::new_v4().simple()),
                        tier_name: subscription.tier_name.clone(),
                        purpose: PaymentPurpose::Renewal,
                        subscription_id: Some(id),
                    },
                    now,
                )?;
                tx.insert_payment(&payment).await?;
                (payment, false)
            }
        };
        tx.commit().await?;

        tracing::info!(
            subscription_id = %id,
            reference = %payment.reference,
            reconcile,
            "renewal claimed"
        );

        let outcome = if reconcile {
            self.charger.reconcile(&payment).await?
        } else {
            self.charger
                .charge(&payment, subscription.payment_method_token.as_deref())
                .await?
        };

        Ok(match outcome {
            ChargeOutcome::Settled(ProcessOutcome::Renewed) => RenewalStep::Renewed,
            ChargeOutcome::Settled(
                ProcessOutcome::RenewalFailed | ProcessOutcome::DunningExhausted,
            ) => RenewalStep::Failed,
            ChargeOutcome::Settled(_) => RenewalStep::Other,
            ChargeOutcome::Unresolved => RenewalStep::Unresolved,
            ChargeOutcome::Blocked(err) => {
                self.release_claim(id).await?;
                return Err(err);
            }
        })
    }

    async fn release_claim(&self, id: SubscriptionId) -> Result<(), BillingError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        if let Some(mut subscription) = tx.find_subscription_for_update(id).await? {
            subscription.release_claim(now);
            tx.update_subscription(&subscription).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cancels an expired or stale subscription if it still qualifies.
    async fn close_if(
        &self,
        id: SubscriptionId,
        reason: CancellationReason,
    ) -> Result<bool, BillingError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        let Some(mut subscription) = tx.find_subscription_for_update(id).await? else {
            return Ok(false);
        };
        let qualifies = match reason {
            CancellationReason::Expired => subscription.is_expired(now),
            CancellationReason::CheckoutTimeout => subscription
                .is_stale_checkout(now, self.settings.pending_checkout_timeout_hours),
            _ => false,
        };
        if !qualifies {
            return Ok(false);
        }
        subscription.cancel(reason, now)?;
        tx.update_subscription(&subscription).await?;
        tx.commit().await?;

        tracing::info!(subscription_id = %id, reason = %reason, "subscription closed");
        dispatch_all(
            self.notifier.as_ref(),
            vec![Notification::new(
                subscription.fan_id.clone(),
                NotificationKind::SubscriptionCancelled {
                    subscription_id: id,
                    reason,
                },
            )],
        )
        .await;
        Ok(true)
    }

    /// Cancels at the owner's request.
    ///
    /// Provider-side billing is stopped first, outside any transaction. A
    /// transient provider failure aborts with a retryable error; a permanent
    /// refusal is logged and the local cancellation proceeds.
    pub async fn cancel_subscription(
        &self,
        user: &AuthenticatedUser,
        id: SubscriptionId,
    ) -> Result<Subscription, BillingError> {
        let subscription = {
            let mut tx = self.store.begin().await?;
            let subscription = tx
                .find_subscription_for_update(id)
                .await?
                .ok_or(BillingError::NotFound("Subscription"))?;
            tx.rollback().await?;
            subscription
        };
        if subscription.fan_id != user.id && !user.is_admin() {
            return Err(BillingError::NotFound("Subscription"));
        }
        if subscription.status == SubscriptionStatus::Cancelled {
            return Ok(subscription);
        }

        match self
            .router
            .cancel_subscription(subscription.payment_provider, &subscription.payment_reference)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_retryable() => {
                tracing::warn!(subscription_id = %id, error = %err, "provider cancel failed, retry later");
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(subscription_id = %id, error = %err, "provider refused cancel, cancelling locally");
            }
        }

        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        let mut subscription = tx
            .find_subscription_for_update(id)
            .await?
            .ok_or(BillingError::NotFound("Subscription"))?;
        if subscription.status == SubscriptionStatus::Cancelled {
            return Ok(subscription);
        }
        subscription.cancel(CancellationReason::UserRequested, now)?;
        tx.update_subscription(&subscription).await?;
        if let Some(mut attempt) = tx.find_open_dunning_attempt(id).await? {
            attempt.resolve(DunningOutcome::Exhausted, now)?;
            tx.update_dunning_attempt(&attempt).await?;
        }
        tx.commit().await?;

        tracing::info!(subscription_id = %id, "subscription cancelled by user");
        dispatch_all(
            self.notifier.as_ref(),
            vec![Notification::new(
                subscription.fan_id.clone(),
                NotificationKind::SubscriptionCancelled {
                    subscription_id: id,
                    reason: CancellationReason::UserRequested,
                },
            )],
        )
        .await;
        Ok(subscription)
    }
}
