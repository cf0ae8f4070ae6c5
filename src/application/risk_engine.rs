//! Risk & chargeback engine.
//!
//! Sole writer of `AmlRiskProfile`. Scores are recomputed from stored
//! aggregates, so recomputation is re-entrant: running it twice writes the
//! same profile.

use std::sync::Arc;

use crate::application::ledger_service::{debit_in, freeze_in, unfreeze_in};
use crate::domain::foundation::{AuthenticatedUser, ChargebackId, Timestamp, UserId};
use crate::domain::payments::{BillingError, PaymentStatus, ProviderKind};
use crate::domain::risk::{
    assess, AmlRiskProfile, Chargeback, ChargebackResolution, CreatorAccount,
};
use crate::ports::{
    dispatch_all, BillingStore, BillingTransaction, Notification, NotificationKind, Notifier,
};

/// Recomputes and stores the creator's profile inside the caller's transaction.
pub(crate) async fn recompute_in(
    tx: &mut dyn BillingTransaction,
    creator_id: &UserId,
    now: Timestamp,
) -> Result<AmlRiskProfile, BillingError> {
    let inputs = tx.risk_inputs(creator_id, now).await?;
    let profile = AmlRiskProfile::from_assessment(creator_id.clone(), assess(&inputs), now);
    tx.save_risk_profile(&profile).await?;
    tracing::info!(
        creator_id = %creator_id,
        risk_score = profile.risk_score,
        daily_limit = profile.daily_limit,
        monthly_limit = profile.monthly_limit,
        flags = ?profile.flags,
        "risk profile recomputed"
    );
    Ok(profile)
}

/// Admin input for opening a dispute.
#[derive(Debug, Clone)]
pub struct OpenChargeback {
    pub provider: ProviderKind,
    pub payment_reference: String,
    /// Disputed amount; defaults to the full payment.
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

pub struct RiskEngine {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn Notifier>,
}

impl RiskEngine {
    pub fn new(store: Arc<dyn BillingStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn calculate_risk_score(
        &self,
        creator_id: &UserId,
    ) -> Result<AmlRiskProfile, BillingError> {
        let mut tx = self.store.begin().await?;
        let profile = recompute_in(&mut *tx, creator_id, Timestamp::now()).await?;
        tx.commit().await?;
        Ok(profile)
    }

    /// Records a dispute against a settled payment and freezes the creator.
    pub async fn open_chargeback(
        &self,
        admin: &AuthenticatedUser,
        input: OpenChargeback,
    ) -> Result<Chargeback, BillingError> {
        admin.require_admin().map_err(|_| BillingError::Forbidden)?;
        let now = Timestamp::now();

        let mut tx = self.store.begin().await?;
        let payment = tx
            .find_payment_for_update(input.provider, &input.payment_reference)
            .await?
            .ok_or(BillingError::NotFound("Payment"))?;
        if payment.status != PaymentStatus::Success {
            return Err(BillingError::Validation(
                "Only settled payments can be disputed".to_string(),
            ));
        }
        let amount = input.amount.unwrap_or(payment.amount);
        if amount > payment.amount {
            return Err(BillingError::Validation(
                "Disputed amount exceeds the payment".to_string(),
            ));
        }

        let chargeback = Chargeback::open(
            payment.payer_id.clone(),
            payment.creator_id.clone(),
            payment.reference.clone(),
            amount,
            payment.currency.clone(),
            input.reason,
            now,
        )?;
        tx.insert_chargeback(&chargeback).await?;
        freeze_in(
            &mut *tx,
            &payment.creator_id,
            &payment.currency,
            "chargeback opened",
            now,
        )
        .await?;
        recompute_in(&mut *tx, &payment.creator_id, now).await?;
        tx.commit().await?;

        tracing::info!(
            chargeback_id = %chargeback.id,
            creator_id = %chargeback.creator_id,
            reference = %chargeback.payment_reference,
            amount,
            "chargeback opened"
        );
        dispatch_all(
            self.notifier.as_ref(),
            vec![Notification::new(
                chargeback.creator_id.clone(),
                NotificationKind::WalletFrozen,
            )],
        )
        .await;
        Ok(chargeback)
    }

    /// Settles a dispute. `Lost` debits the wallet (floored at zero); both
    /// outcomes unfreeze.
    pub async fn resolve_chargeback(
        &self,
        admin: &AuthenticatedUser,
        chargeback_id: ChargebackId,
        resolution: ChargebackResolution,
    ) -> Result<Chargeback, BillingError> {
        admin.require_admin().map_err(|_| BillingError::Forbidden)?;
        let now = Timestamp::now();

        let mut tx = self.store.begin().await?;
        let mut chargeback = tx
            .find_chargeback_for_update(chargeback_id)
            .await?
            .ok_or(BillingError::NotFound("Chargeback"))?;
        chargeback.resolve(resolution, admin.id.clone(), now)?;
        tx.update_chargeback(&chargeback).await?;

        let debited = match resolution {
            ChargebackResolution::Lost => {
                debit_in(
                    &mut *tx,
                    &chargeback.creator_id,
                    &chargeback.currency,
                    chargeback.amount,
                    now,
                )
                .await?
            }
            ChargebackResolution::Won => 0,
        };
        unfreeze_in(&mut *tx, &chargeback.creator_id, now).await?;
        recompute_in(&mut *tx, &chargeback.creator_id, now).await?;
        tx.commit().await?;

        tracing::info!(
            chargeback_id = %chargeback.id,
            creator_id = %chargeback.creator_id,
            status = %chargeback.status,
            debited,
            "chargeback resolved"
        );
        dispatch_all(
            self.notifier.as_ref(),
            vec![Notification::new(
                chargeback.creator_id.clone(),
                NotificationKind::ChargebackResolved {
                    status: chargeback.status,
                },
            )],
        )
        .await;
        Ok(chargeback)
    }

    pub async fn on_kyc_approved(
        &self,
        admin: &AuthenticatedUser,
        creator_id: &UserId,
    ) -> Result<AmlRiskProfile, BillingError> {
        admin.require_admin().map_err(|_| BillingError::Forbidden)?;
        let now = Timestamp::now();

        let mut tx = self.store.begin().await?;
        let mut account = match tx.find_creator_account(creator_id).await? {
            Some(account) => account,
            None => CreatorAccount::new(creator_id.clone(), now),
        };
        account.approve_kyc(now);
        tx.save_creator_account(&account).await?;
        let profile = recompute_in(&mut *tx, creator_id, now).await?;
        tx.commit().await?;

        tracing::info!(creator_id = %creator_id, "kyc approved");
        Ok(profile)
    }
}
