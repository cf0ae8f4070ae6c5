//! Dunning engine - retries failed renewals on the configured backoff.
//!
//! Each due attempt is claimed before charging, so overlapping sweeps never
//! charge the same attempt twice. The attempt records the reference of the
//! payment it created; a sweep that finds that payment still pending polls
//! the provider instead of charging again.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::application::renewal_charge::{ChargeOutcome, RenewalCharger};
use crate::application::settings::BillingSettings;
use crate::application::webhook_processor::{ProcessOutcome, WebhookEventProcessor};
use crate::domain::dunning::{DunningAttempt, DunningOutcome};
use crate::domain::foundation::{DunningAttemptId, Timestamp};
use crate::domain::payments::{BillingError, NewPayment, Payment, PaymentPurpose, PaymentStatus};
use crate::ports::{BillingStore, PaymentRouter};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DunningSweepReport {
    pub due: usize,
    pub skipped: usize,
    pub recovered: usize,
    /// Failed again with a later attempt scheduled.
    pub rescheduled: usize,
    pub exhausted: usize,
    pub unresolved: usize,
    /// Attempts closed because the subscription was no longer active.
    pub closed: usize,
    pub errors: usize,
}

enum SweepStep {
    Skipped,
    Closed,
    Settled(ProcessOutcome),
    Unresolved,
}

pub struct DunningEngine {
    store: Arc<dyn BillingStore>,
    charger: RenewalCharger,
    settings: BillingSettings,
}

impl DunningEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        router: Arc<dyn PaymentRouter>,
        processor: Arc<WebhookEventProcessor>,
        settings: BillingSettings,
    ) -> Self {
        let charger = RenewalCharger::new(store.clone(), router, processor, settings.clone());
        Self {
            store,
            charger,
            settings,
        }
    }

    pub async fn process_dunning_attempts(&self) -> Result<DunningSweepReport, BillingError> {
        let mut report = DunningSweepReport::default();
        let now = Timestamp::now();

        let due = {
            let mut tx = self.store.begin().await?;
            let due = tx
                .list_due_dunning_attempts(now, self.settings.scan_batch_size)
                .await?;
            tx.rollback().await?;
            due
        };
        report.due = due.len();

        for id in due {
            match self.run_attempt(id).await {
                Ok(SweepStep::Skipped) => report.skipped += 1,
                Ok(SweepStep::Closed) => report.closed += 1,
                Ok(SweepStep::Unresolved) => report.unresolved += 1,
                Ok(SweepStep::Settled(ProcessOutcome::Renewed)) => report.recovered += 1,
                Ok(SweepStep::Settled(ProcessOutcome::RenewalFailed)) => report.rescheduled += 1,
                Ok(SweepStep::Settled(ProcessOutcome::DunningExhausted)) => report.exhausted += 1,
                Ok(SweepStep::Settled(outcome)) => {
                    tracing::debug!(attempt_id = %id, outcome = %outcome, "attempt settled elsewhere");
                }
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(attempt_id = %id, error = %err, "dunning attempt failed to run");
                }
            }
        }

        tracing::info!(
            due = report.due,
            recovered = report.recovered,
            rescheduled = report.rescheduled,
            exhausted = report.exhausted,
            unresolved = report.unresolved,
            closed = report.closed,
            skipped = report.skipped,
            errors = report.errors,
            "dunning sweep finished"
        );
        Ok(report)
    }

    async fn run_attempt(&self, id: DunningAttemptId) -> Result<SweepStep, BillingError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        let Some(mut attempt) = tx
            .claim_dunning_attempt(id, now, self.settings.claim_until(now))
            .await?
        else {
            tracing::debug!(attempt_id = %id, "dunning attempt claimed elsewhere");
            return Ok(SweepStep::Skipped);
        };
        let subscription = tx
            .find_subscription_for_update(attempt.subscription_id)
            .await?
            .ok_or(BillingError::NotFound("Subscription"))?;

        if !subscription.is_active() {
            attempt.resolve(DunningOutcome::Exhausted, now)?;
            tx.update_dunning_attempt(&attempt).await?;
            tx.commit().await?;
            tracing::info!(
                subscription_id = %subscription.id,
                attempt = attempt.attempt_number,
                status = %subscription.status,
                "dunning closed for inactive subscription"
            );
            return Ok(SweepStep::Closed);
        }

        let existing = match attempt.payment_reference.as_deref() {
            Some(reference) => tx
                .find_payment_for_update(subscription.payment_provider, reference)
                .await?
                .filter(|p| p.status == PaymentStatus::Pending),
            None => None,
        };
        let (payment, reconcile) = match existing {
            Some(payment) => (payment, true),
            None => {
                let payment = Payment::new(
                    NewPayment {
                        payer_id: subscription.fan_id.clone(),
                        creator_id: subscription.creator_id.clone(),
                        amount: subscription.tier_price,
                        currency: subscription.currency.clone(),
                        provider: subscription.payment_provider,
                        reference: format!("dun-{}", Uuid::new_v4().simple()),
                        tier_name: subscription.tier_name.clone(),
                        purpose: PaymentPurpose::Renewal,
                        subscription_id: Some(subscription.id),
                    },
                    now,
                )?;
                tx.insert_payment(&payment).await?;
                attempt.payment_reference = Some(payment.reference.clone());
                attempt.updated_at = now;
                tx.update_dunning_attempt(&attempt).await?;
                (payment, false)
            }
        };
        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription.id,
            attempt = attempt.attempt_number,
            reference = %payment.reference,
            reconcile,
            "dunning attempt claimed"
        );

        let outcome = if reconcile {
            self.charger.reconcile(&payment).await?
        } else {
            self.charger
                .charge(&payment, subscription.payment_method_token.as_deref())
                .await?
        };

        match outcome {
            ChargeOutcome::Settled(outcome) => Ok(SweepStep::Settled(outcome)),
            ChargeOutcome::Unresolved => Ok(SweepStep::Unresolved),
            ChargeOutcome::Blocked(err) => {
                self.release(&attempt).await?;
                Err(err)
            }
        }
    }

    async fn release(&self, attempt: &DunningAttempt) -> Result<(), BillingError> {
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        if let Some(mut current) = tx.find_open_dunning_attempt(attempt.subscription_id).await? {
            if current.id == attempt.id {
                current.release_claim(now);
                tx.update_dunning_attempt(&current).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
