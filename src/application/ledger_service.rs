//! Ledger: the only writer of creator wallet balances.
//!
//! The `*_in` functions mutate wallets inside a caller's transaction so the
//! balance change commits atomically with its cause (payment success,
//! chargeback resolution). `LedgerService` wraps them for standalone
//! adjustments and runs the payout flow.

use std::sync::Arc;

use crate::domain::foundation::{AuthenticatedUser, Currency, PayoutId, Timestamp, UserId};
use crate::domain::ledger::{CreatorWallet, Payout};
use crate::domain::payments::{select_payout_provider, BillingError};
use crate::domain::risk::AmlRiskProfile;
use crate::ports::{
    dispatch_all, BillingStore, BillingTransaction, Notification, NotificationKind, Notifier,
    PaymentRouter, PayoutRequest,
};

// ════════════════════════════════════════════════════════════════════════════════
// In-transaction wallet operations
// ════════════════════════════════════════════════════════════════════════════════

/// Locks the creator's wallet for `currency`, creating the row if absent.
///
/// A new wallet inherits the freeze of the creator's other wallets. Sibling
/// rows are locked before the new one, in the same order `freeze_in` uses.
async fn wallet_for_update(
    tx: &mut dyn BillingTransaction,
    creator_id: &UserId,
    currency: &Currency,
    now: Timestamp,
) -> Result<CreatorWallet, BillingError> {
    if let Some(wallet) = tx.find_wallet_for_update(creator_id, currency).await? {
        return Ok(wallet);
    }
    let siblings = tx.list_wallets_for_update(creator_id).await?;
    let mut wallet = tx.ensure_wallet_for_update(creator_id, currency, now).await?;
    if wallet.frozen {
        return Ok(wallet);
    }
    if let Some(frozen) = siblings.iter().find(|w| w.frozen) {
        wallet.freeze(
            frozen.frozen_reason.clone().unwrap_or_else(|| "frozen".to_string()),
            now,
        );
    }
    Ok(wallet)
}

pub(crate) async fn credit_in(
    tx: &mut dyn BillingTransaction,
    creator_id: &UserId,
    currency: &Currency,
    amount: i64,
    now: Timestamp,
) -> Result<CreatorWallet, BillingError> {
    let mut wallet = wallet_for_update(tx, creator_id, currency, now).await?;
    wallet.credit(amount, now)?;
    tx.save_wallet(&wallet).await?;
    tracing::info!(
        creator_id = %creator_id,
        currency = %currency,
        amount,
        balance = wallet.balance,
        "wallet credited"
    );
    Ok(wallet)
}

/// Debits up to `amount`; the balance floors at zero. Returns the amount applied.
pub(crate) async fn debit_in(
    tx: &mut dyn BillingTransaction,
    creator_id: &UserId,
    currency: &Currency,
    amount: i64,
    now: Timestamp,
) -> Result<i64, BillingError> {
    let mut wallet = wallet_for_update(tx, creator_id, currency, now).await?;
    let applied = wallet.debit(amount, now);
    tx.save_wallet(&wallet).await?;
    tracing::info!(
        creator_id = %creator_id,
        currency = %currency,
        requested = amount,
        applied,
        balance = wallet.balance,
        "wallet debited"
    );
    Ok(applied)
}

/// Freezes every wallet of the creator, creating one in `currency` if none
/// exists so later credits stay frozen.
pub(crate) async fn freeze_in(
    tx: &mut dyn BillingTransaction,
    creator_id: &UserId,
    currency: &Currency,
    reason: &str,
    now: Timestamp,
) -> Result<(), BillingError> {
    let mut wallets = tx.list_wallets_for_update(creator_id).await?;
    if !wallets.iter().any(|w| &w.currency == currency) {
        wallets.push(tx.ensure_wallet_for_update(creator_id, currency, now).await?);
    }
    for wallet in &mut wallets {
        wallet.freeze(reason, now);
        tx.save_wallet(wallet).await?;
    }
    tracing::info!(creator_id = %creator_id, reason, "wallets frozen");
    Ok(())
}

pub(crate) async fn unfreeze_in(
    tx: &mut dyn BillingTransaction,
    creator_id: &UserId,
    now: Timestamp,
) -> Result<(), BillingError> {
    for mut wallet in tx.list_wallets_for_update(creator_id).await? {
        if wallet.frozen {
            wallet.unfreeze(now);
            tx.save_wallet(&wallet).await?;
        }
    }
    tracing::info!(creator_id = %creator_id, "wallets unfrozen");
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// Service
// ════════════════════════════════════════════════════════════════════════════════

pub struct LedgerService {
    store: Arc<dyn BillingStore>,
    router: Arc<dyn PaymentRouter>,
    notifier: Arc<dyn Notifier>,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        router: Arc<dyn PaymentRouter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            router,
            notifier,
        }
    }

    pub async fn credit(
        &self,
        creator_id: &UserId,
        currency: &Currency,
        amount: i64,
    ) -> Result<CreatorWallet, BillingError> {
        let mut tx = self.store.begin().await?;
        let wallet = credit_in(&mut *tx, creator_id, currency, amount, Timestamp::now()).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    pub async fn debit(
        &self,
        creator_id: &UserId,
        currency: &Currency,
        amount: i64,
    ) -> Result<i64, BillingError> {
        let mut tx = self.store.begin().await?;
        let applied = debit_in(&mut *tx, creator_id, currency, amount, Timestamp::now()).await?;
        tx.commit().await?;
        Ok(applied)
    }

    pub async fn freeze(
        &self,
        creator_id: &UserId,
        currency: &Currency,
        reason: &str,
    ) -> Result<(), BillingError> {
        let mut tx = self.store.begin().await?;
        freeze_in(&mut *tx, creator_id, currency, reason, Timestamp::now()).await?;
        tx.commit().await?;
        dispatch_all(
            self.notifier.as_ref(),
            vec![Notification::new(creator_id.clone(), NotificationKind::WalletFrozen)],
        )
        .await;
        Ok(())
    }

    pub async fn unfreeze(&self, creator_id: &UserId) -> Result<(), BillingError> {
        let mut tx = self.store.begin().await?;
        unfreeze_in(&mut *tx, creator_id, Timestamp::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Creates a payout request and reserves its amount.
    ///
    /// Rejected while the wallet is frozen, when the available balance is
    /// short, or when the creator's daily or monthly limit would be exceeded.
    pub async fn request_payout(
        &self,
        creator_id: &UserId,
        amount: i64,
        currency: &Currency,
        destination: &str,
    ) -> Result<Payout, BillingError> {
        let now = Timestamp::now();
        let provider = select_payout_provider(currency, &self.router.enabled_providers()).ok_or_else(
            || BillingError::Validation(format!("Payouts in {} are not available", currency)),
        )?;

        let mut tx = self.store.begin().await?;
        let mut wallet = tx
            .find_wallet_for_update(creator_id, currency)
            .await?
            .ok_or(BillingError::NotFound("Wallet"))?;
        if wallet.frozen {
            tracing::warn!(creator_id = %creator_id, "payout refused: wallet frozen");
            return Err(BillingError::WalletFrozen);
        }

        let profile = match tx.find_risk_profile(creator_id).await? {
            Some(profile) => profile,
            None => AmlRiskProfile::unscored(creator_id.clone(), now),
        };
        let daily = tx.sum_payouts_since(creator_id, currency, now.start_of_day()).await?;
        if daily.saturating_add(amount) > profile.daily_limit {
            tracing::warn!(creator_id = %creator_id, daily, amount, limit = profile.daily_limit, "daily payout limit");
            return Err(BillingError::LimitExceeded("daily"));
        }
        let monthly = tx.sum_payouts_since(creator_id, currency, now.start_of_month()).await?;
        if monthly.saturating_add(amount) > profile.monthly_limit {
            tracing::warn!(creator_id = %creator_id, monthly, amount, limit = profile.monthly_limit, "monthly payout limit");
            return Err(BillingError::LimitExceeded("monthly"));
        }

        wallet.reserve_payout(amount, now)?;
        let payout = Payout::request(
            creator_id.clone(),
            amount,
            currency.clone(),
            destination.to_string(),
            provider,
            now,
        )?;
        tx.insert_payout(&payout).await?;
        tx.save_wallet(&wallet).await?;
        tx.commit().await?;

        tracing::info!(
            payout_id = %payout.id,
            creator_id = %creator_id,
            amount,
            provider = %provider,
            "payout requested"
        );
        Ok(payout)
    }

    /// Admin approval: sends the payout to the provider and settles it.
    ///
    /// The provider call happens outside any transaction with the payout id
    /// as idempotency reference, so a retried approval cannot pay twice.
    pub async fn approve_payout(
        &self,
        admin: &AuthenticatedUser,
        payout_id: PayoutId,
    ) -> Result<Payout, BillingError> {
        admin.require_admin().map_err(|_| BillingError::Forbidden)?;
        let now = Timestamp::now();

        let mut tx = self.store.begin().await?;
        let mut payout = tx
            .find_payout_for_update(payout_id)
            .await?
            .ok_or(BillingError::NotFound("Payout"))?;
        let frozen = tx
            .find_wallet_for_update(&payout.creator_id, &payout.currency)
            .await?
            .map(|w| w.frozen)
            .unwrap_or(false);
        if frozen {
            return Err(BillingError::WalletFrozen);
        }
        payout.start_processing(admin.id.clone(), now)?;
        tx.update_payout(&payout).await?;
        tx.commit().await?;

        let request = PayoutRequest {
            reference: payout.id.to_string(),
            amount: payout.amount,
            currency: payout.currency.clone(),
            destination: payout.destination.clone(),
        };
        let result = self.router.initiate_payout(payout.provider, &request).await;

        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;
        let mut payout = tx
            .find_payout_for_update(payout_id)
            .await?
            .ok_or(BillingError::NotFound("Payout"))?;
        let mut wallet = tx
            .find_wallet_for_update(&payout.creator_id, &payout.currency)
            .await?
            .ok_or(BillingError::NotFound("Wallet"))?;

        let notification = match result {
            Ok(result) if result.success => {
                payout.mark_paid(result.provider_reference, now)?;
                wallet.settle_payout(payout.amount, now);
                tracing::info!(payout_id = %payout.id, amount = payout.amount, "payout paid");
                NotificationKind::PayoutPaid {
                    amount: payout.amount,
                }
            }
            Ok(_) => {
                payout.mark_failed("rejected by provider", now)?;
                wallet.release_payout(payout.amount, now);
                tracing::warn!(payout_id = %payout.id, "payout rejected by provider");
                NotificationKind::PayoutFailed {
                    amount: payout.amount,
                }
            }
            Err(err) if err.is_retryable() => {
                payout.revert_to_requested(now)?;
                tx.update_payout(&payout).await?;
                tx.commit().await?;
                tracing::warn!(payout_id = %payout.id, error = %err, "payout outcome unknown, reverted to requested");
                return Err(err);
            }
            Err(err) => {
                payout.mark_failed(err.public_message(), now)?;
                wallet.release_payout(payout.amount, now);
                tracing::warn!(payout_id = %payout.id, error = %err, "payout failed");
                NotificationKind::PayoutFailed {
                    amount: payout.amount,
                }
            }
        };

        tx.update_payout(&payout).await?;
        tx.save_wallet(&wallet).await?;
        tx.commit().await?;

        dispatch_all(
            self.notifier.as_ref(),
            vec![Notification::new(payout.creator_id.clone(), notification)],
        )
        .await;
        Ok(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::notify::RecordingNotifier;
    use crate::adapters::providers::{MockGateway, ProviderRouter};
    use crate::domain::foundation::Role;
    use crate::domain::ledger::PayoutStatus;
    use crate::domain::payments::{CanonicalStatus, ProviderKind};
    use crate::ports::{GatewayError, PayoutResult};

    struct Fixture {
        store: InMemoryBillingStore,
        gateway: MockGateway,
        notifier: RecordingNotifier,
        ledger: LedgerService,
    }

    fn fixture() -> Fixture {
        let store = InMemoryBillingStore::new();
        let gateway = MockGateway::new(ProviderKind::Stripe);
        let notifier = RecordingNotifier::new();
        let router = ProviderRouter::new().with_gateway(Arc::new(gateway.clone()));
        let ledger = LedgerService::new(
            Arc::new(store.clone()),
            Arc::new(router),
            Arc::new(notifier.clone()),
        );
        Fixture {
            store,
            gateway,
            notifier,
            ledger,
        }
    }

    fn creator() -> UserId {
        UserId::new("creator-1").unwrap()
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn admin() -> AuthenticatedUser {
        AuthenticatedUser::new(UserId::new("admin-1").unwrap(), Role::Admin)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Wallet operations
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn debit_floors_at_zero() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 1500).await.unwrap();
        let applied = f.ledger.debit(&creator(), &usd(), 2000).await.unwrap();
        assert_eq!(applied, 1500);
        assert_eq!(f.store.wallet(&creator(), &usd()).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn frozen_wallet_still_accepts_credits() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 100).await.unwrap();
        f.ledger.freeze(&creator(), &usd(), "chargeback").await.unwrap();
        f.ledger.credit(&creator(), &usd(), 50).await.unwrap();

        let wallet = f.store.wallet(&creator(), &usd()).await.unwrap();
        assert_eq!(wallet.balance, 150);
        assert!(wallet.frozen);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn new_currency_wallet_inherits_freeze() {
        let f = fixture();
        f.ledger.freeze(&creator(), &usd(), "chargeback").await.unwrap();
        let eur = Currency::new("EUR").unwrap();
        f.ledger.credit(&creator(), &eur, 100).await.unwrap();
        assert!(f.store.wallet(&creator(), &eur).await.unwrap().frozen);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Payouts
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn frozen_wallet_rejects_payout_request() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 10_000).await.unwrap();
        f.ledger.freeze(&creator(), &usd(), "dispute").await.unwrap();

        let result = f.ledger.request_payout(&creator(), 1000, &usd(), "acct_1").await;
        assert!(matches!(result, Err(BillingError::WalletFrozen)));
        assert_eq!(f.store.wallet(&creator(), &usd()).await.unwrap().pending_payouts, 0);
    }

    #[tokio::test]
    async fn payout_request_checks_available_balance() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 1000).await.unwrap();
        f.ledger.request_payout(&creator(), 700, &usd(), "acct_1").await.unwrap();

        let second = f.ledger.request_payout(&creator(), 400, &usd(), "acct_1").await;
        assert!(matches!(
            second,
            Err(BillingError::InsufficientBalance {
                available: 300,
                requested: 400
            })
        ));
    }

    #[tokio::test]
    async fn payout_request_enforces_daily_limit() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 1_000_000).await.unwrap();
        // Unscored creators get the 200k daily band.
        let result = f.ledger.request_payout(&creator(), 250_000, &usd(), "acct_1").await;
        assert!(matches!(result, Err(BillingError::LimitExceeded("daily"))));
    }

    #[tokio::test]
    async fn approved_payout_settles_wallet() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 1000).await.unwrap();
        let payout = f.ledger.request_payout(&creator(), 600, &usd(), "acct_1").await.unwrap();

        let paid = f.ledger.approve_payout(&admin(), payout.id).await.unwrap();
        assert_eq!(paid.status, PayoutStatus::Paid);

        let wallet = f.store.wallet(&creator(), &usd()).await.unwrap();
        assert_eq!(wallet.balance, 400);
        assert_eq!(wallet.pending_payouts, 0);
        assert_eq!(f.gateway.payouts()[0].reference, payout.id.to_string());
    }

    #[tokio::test]
    async fn declined_payout_releases_reservation() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 1000).await.unwrap();
        let payout = f.ledger.request_payout(&creator(), 600, &usd(), "acct_1").await.unwrap();
        f.gateway.push_payout(Err(GatewayError::Declined("bad account".to_string())));

        let failed = f.ledger.approve_payout(&admin(), payout.id).await.unwrap();
        assert_eq!(failed.status, PayoutStatus::Failed);

        let wallet = f.store.wallet(&creator(), &usd()).await.unwrap();
        assert_eq!(wallet.balance, 1000);
        assert_eq!(wallet.pending_payouts, 0);
    }

    #[tokio::test]
    async fn transient_payout_failure_is_retryable_and_keeps_reservation() {
        let f = fixture();
        f.ledger.credit(&creator(), &usd(), 1000).await.unwrap();
        let payout = f.ledger.request_payout(&creator(), 600, &usd(), "acct_1").await.unwrap();
        f.gateway.push_payout(Err(GatewayError::Timeout));

        let err = f.ledger.approve_payout(&admin(), payout.id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.store.payout(payout.id).await.unwrap().status, PayoutStatus::Requested);
        assert_eq!(f.store.wallet(&creator(), &usd()).await.unwrap().pending_payouts, 600);

        f.gateway.push_payout(Ok(PayoutResult {
            success: true,
            provider_reference: "tr_1".to_string(),
            status: CanonicalStatus::Success,
        }));
        let paid = f.ledger.approve_payout(&admin(), payout.id).await.unwrap();
        assert_eq!(paid.status, PayoutStatus::Paid);
        assert_eq!(f.gateway.payouts().len(), 2);
    }

    #[tokio::test]
    async fn only_admins_approve() {
        let f = fixture();
        let fan = AuthenticatedUser::new(UserId::new("fan-1").unwrap(), Role::Fan);
        let result = f.ledger.approve_payout(&fan, PayoutId::new()).await;
        assert!(matches!(result, Err(BillingError::Forbidden)));
    }
}
