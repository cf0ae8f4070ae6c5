//! Transactional store port.
//!
//! Every state change in the engine happens inside one
//! [`BillingTransaction`]. Reads ending in `_for_update` lock the row for the
//! rest of the transaction. Dropping a transaction without calling
//! [`BillingTransaction::commit`] rolls it back.
//!
//! ## Race Condition Handling
//!
//! - The payment event log has a unique key; a losing concurrent insert
//!   gets [`SaveResult::AlreadyExists`] and the caller rolls back.
//! - Renewal and dunning claims are conditional updates; only one runner
//!   sees `true`/`Some`.

use async_trait::async_trait;

use crate::domain::dunning::DunningAttempt;
use crate::domain::foundation::{
    ChargebackId, Currency, DomainError, DunningAttemptId, PayoutId, SubscriptionId, Timestamp,
    UserId,
};
use crate::domain::ledger::{CreatorWallet, Payout};
use crate::domain::payments::{FeeSchedule, Payment, PaymentEvent, PaymentPurpose, ProviderKind};
use crate::domain::risk::{AmlRiskProfile, Chargeback, CreatorAccount, RiskInputs};
use crate::domain::subscription::Subscription;

/// Result of an insert guarded by a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Inserted,
    AlreadyExists,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError>;
}

#[async_trait]
pub trait BillingTransaction: Send {
    // ─── Payment event log ───────────────────────────────────────────

    async fn payment_event_exists(&mut self, event_id: &str) -> Result<bool, DomainError>;

    async fn append_payment_event(&mut self, event: &PaymentEvent) -> Result<SaveResult, DomainError>;

    // ─── Payments ────────────────────────────────────────────────────

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError>;

    /// Finds a payment by our reference or the provider-assigned one.
    async fn find_payment_for_update(
        &mut self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Payment>, DomainError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError>;

    /// Latest still-pending payment of the given purpose for a subscription.
    async fn find_pending_payment(
        &mut self,
        subscription_id: SubscriptionId,
        purpose: PaymentPurpose,
    ) -> Result<Option<Payment>, DomainError>;

    // ─── Subscriptions ───────────────────────────────────────────────

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError>;

    async fn find_subscription_for_update(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError>;

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError>;

    /// The active subscription for a (fan, creator, tier) tuple, if any.
    async fn find_active_subscription(
        &mut self,
        fan_id: &UserId,
        creator_id: &UserId,
        tier_name: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Active, auto-renewing, past end date, unclaimed, and not in dunning.
    async fn list_due_for_renewal(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError>;

    /// Active, non-renewing, past end date.
    async fn list_expired(&mut self, now: Timestamp, limit: u32)
        -> Result<Vec<SubscriptionId>, DomainError>;

    /// Pending and created before `cutoff`.
    async fn list_stale_checkouts(
        &mut self,
        cutoff: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError>;

    /// Sets the renewal claim if no unexpired claim exists and the
    /// subscription is still due. Returns false if another runner holds it.
    async fn claim_subscription_for_renewal(
        &mut self,
        id: SubscriptionId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<bool, DomainError>;

    // ─── Dunning ─────────────────────────────────────────────────────

    async fn insert_dunning_attempt(&mut self, attempt: &DunningAttempt) -> Result<(), DomainError>;

    async fn update_dunning_attempt(&mut self, attempt: &DunningAttempt) -> Result<(), DomainError>;

    async fn find_open_dunning_attempt(
        &mut self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<DunningAttempt>, DomainError>;

    /// Open attempts whose schedule has arrived and which nobody has claimed.
    async fn list_due_dunning_attempts(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningAttemptId>, DomainError>;

    /// Claims an open, due, unclaimed attempt and returns it.
    async fn claim_dunning_attempt(
        &mut self,
        id: DunningAttemptId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<DunningAttempt>, DomainError>;

    // ─── Wallets ─────────────────────────────────────────────────────

    async fn find_wallet_for_update(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
    ) -> Result<Option<CreatorWallet>, DomainError>;

    /// Creates an empty wallet row if none exists, then locks and returns it.
    ///
    /// A concurrent creator of the same row wins; the caller sees its
    /// committed balance.
    async fn ensure_wallet_for_update(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
        now: Timestamp,
    ) -> Result<CreatorWallet, DomainError>;

    async fn list_wallets_for_update(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Vec<CreatorWallet>, DomainError>;

    /// Writes back a wallet obtained from one of the locking reads.
    ///
    /// Fails with `WalletNotFound` if the row does not exist.
    async fn save_wallet(&mut self, wallet: &CreatorWallet) -> Result<(), DomainError>;

    // ─── Payouts ─────────────────────────────────────────────────────

    async fn insert_payout(&mut self, payout: &Payout) -> Result<(), DomainError>;

    async fn update_payout(&mut self, payout: &Payout) -> Result<(), DomainError>;

    async fn find_payout_for_update(&mut self, id: PayoutId) -> Result<Option<Payout>, DomainError>;

    /// Sum of non-failed payouts requested at or after `since`.
    async fn sum_payouts_since(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
        since: Timestamp,
    ) -> Result<i64, DomainError>;

    // ─── Chargebacks ─────────────────────────────────────────────────

    async fn insert_chargeback(&mut self, chargeback: &Chargeback) -> Result<(), DomainError>;

    async fn update_chargeback(&mut self, chargeback: &Chargeback) -> Result<(), DomainError>;

    async fn find_chargeback_for_update(
        &mut self,
        id: ChargebackId,
    ) -> Result<Option<Chargeback>, DomainError>;

    // ─── Risk ────────────────────────────────────────────────────────

    /// Aggregates payment and chargeback history for scoring.
    async fn risk_inputs(&mut self, creator_id: &UserId, now: Timestamp)
        -> Result<RiskInputs, DomainError>;

    async fn find_risk_profile(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Option<AmlRiskProfile>, DomainError>;

    async fn save_risk_profile(&mut self, profile: &AmlRiskProfile) -> Result<(), DomainError>;

    async fn find_creator_account(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Option<CreatorAccount>, DomainError>;

    async fn save_creator_account(&mut self, account: &CreatorAccount) -> Result<(), DomainError>;

    // ─── Configuration ───────────────────────────────────────────────

    /// Highest-version stored fee override, if any.
    async fn current_fee_schedule(&mut self) -> Result<Option<FeeSchedule>, DomainError>;

    // ─── Lifecycle ───────────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}
