//! Off-session charging shared by the renewal scan and the dunning sweep.
//!
//! Provider calls happen outside any transaction. Definite outcomes are
//! turned into canonical events and applied by the webhook processor, so a
//! charge result and a racing provider webhook collapse into one effect.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::application::checkout::attach_provider_reference_in;
use crate::application::settings::BillingSettings;
use crate::application::webhook_processor::{
    charge_outcome_event, ProcessOutcome, WebhookEventProcessor,
};
use crate::domain::foundation::Timestamp;
use crate::domain::payments::{BillingError, CanonicalStatus, Payment};
use crate::ports::{BillingStore, ChargeRequest, PaymentRouter};

#[derive(Debug)]
pub(crate) enum ChargeOutcome {
    /// Applied through the processor.
    Settled(ProcessOutcome),
    /// Outcome unknown. The caller keeps its claim; the next run polls.
    Unresolved,
    /// Nothing was attempted; the caller releases its claim.
    Blocked(BillingError),
}

pub(crate) struct RenewalCharger {
    store: Arc<dyn BillingStore>,
    router: Arc<dyn PaymentRouter>,
    processor: Arc<WebhookEventProcessor>,
    settings: BillingSettings,
}

impl RenewalCharger {
    pub(crate) fn new(
        store: Arc<dyn BillingStore>,
        router: Arc<dyn PaymentRouter>,
        processor: Arc<WebhookEventProcessor>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            store,
            router,
            processor,
            settings,
        }
    }

    /// Charges the stored payment method for a freshly created payment.
    ///
    /// A missing token counts as a failed charge.
    pub(crate) async fn charge(
        &self,
        payment: &Payment,
        token: Option<&str>,
    ) -> Result<ChargeOutcome, BillingError> {
        let Some(token) = token else {
            tracing::warn!(reference = %payment.reference, "no stored payment method, charge failed");
            return self.settle(payment, CanonicalStatus::Failed, None).await;
        };

        let mut metadata = BTreeMap::new();
        if let Some(subscription_id) = payment.subscription_id {
            metadata.insert("subscription_id".to_string(), subscription_id.to_string());
        }
        let request = ChargeRequest {
            reference: payment.reference.clone(),
            payer_id: payment.payer_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method_token: token.to_string(),
            metadata,
        };

        match self.router.charge(payment.provider, &request).await {
            Ok(result) => {
                if let Some(provider_reference) = &result.provider_reference {
                    self.attach(payment, provider_reference).await;
                }
                tracing::info!(
                    provider = %payment.provider,
                    reference = %payment.reference,
                    status = %result.status,
                    "charge submitted"
                );
                match result.status {
                    CanonicalStatus::Pending => Ok(ChargeOutcome::Unresolved),
                    status => {
                        self.settle(payment, status, result.provider_reference.as_deref())
                            .await
                    }
                }
            }
            Err(err) => self.classify_charge_error(payment, err).await,
        }
    }

    /// Polls the provider for a payment whose earlier charge had no definite outcome.
    ///
    /// Payments still unresolved after the pending timeout are failed.
    pub(crate) async fn reconcile(&self, payment: &Payment) -> Result<ChargeOutcome, BillingError> {
        let reference = payment
            .provider_reference
            .as_deref()
            .unwrap_or(&payment.reference);
        let abandoned = !payment
            .created_at
            .add_hours(self.settings.pending_checkout_timeout_hours)
            .is_after(&Timestamp::now());

        match self.router.verify_payment(payment.provider, reference).await {
            Ok(CanonicalStatus::Pending) if abandoned => {
                tracing::warn!(reference = %payment.reference, "pending charge abandoned");
                self.settle(payment, CanonicalStatus::Failed, None).await
            }
            Ok(CanonicalStatus::Pending) => Ok(ChargeOutcome::Unresolved),
            Ok(status) => {
                tracing::info!(reference = %payment.reference, status = %status, "charge reconciled");
                self.settle(payment, status, None).await
            }
            Err(err @ (BillingError::ProviderNotConfigured(_) | BillingError::Configuration(_))) => {
                Ok(ChargeOutcome::Blocked(err))
            }
            Err(err) if abandoned && !err.is_retryable() => {
                tracing::warn!(reference = %payment.reference, error = %err, "reconciliation failed, charge abandoned");
                self.settle(payment, CanonicalStatus::Failed, None).await
            }
            Err(err) => {
                tracing::warn!(reference = %payment.reference, error = %err, "reconciliation poll failed");
                Ok(ChargeOutcome::Unresolved)
            }
        }
    }

    async fn classify_charge_error(
        &self,
        payment: &Payment,
        err: BillingError,
    ) -> Result<ChargeOutcome, BillingError> {
        match err {
            BillingError::Declined(_)
            | BillingError::Validation(_)
            | BillingError::UnsupportedCurrency { .. } => {
                tracing::info!(reference = %payment.reference, error = %err, "charge refused");
                self.settle(payment, CanonicalStatus::Failed, None).await
            }
            BillingError::ProviderNotConfigured(_) | BillingError::Configuration(_) => {
                tracing::error!(reference = %payment.reference, error = %err, "charge not attempted");
                Ok(ChargeOutcome::Blocked(err))
            }
            err => {
                tracing::warn!(reference = %payment.reference, error = %err, "charge outcome unknown");
                Ok(ChargeOutcome::Unresolved)
            }
        }
    }

    async fn settle(
        &self,
        payment: &Payment,
        status: CanonicalStatus,
        provider_reference: Option<&str>,
    ) -> Result<ChargeOutcome, BillingError> {
        let event = charge_outcome_event(payment, status, provider_reference);
        let outcome = self.processor.process_renewal_event(&event).await?;
        Ok(ChargeOutcome::Settled(outcome))
    }

    async fn attach(&self, payment: &Payment, provider_reference: &str) {
        let result = async {
            let mut tx = self.store.begin().await?;
            attach_provider_reference_in(
                &mut *tx,
                payment.provider,
                &payment.reference,
                provider_reference,
                Timestamp::now(),
            )
            .await?;
            tx.commit().await?;
            Ok::<_, BillingError>(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(reference = %payment.reference, error = %err, "could not attach provider reference");
        }
    }
}
