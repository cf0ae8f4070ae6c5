//! In-memory `BillingStore`.
//!
//! A single async mutex guards the whole state, so transactions are fully
//! serialized. Each transaction works on a copy that replaces the shared
//! state on commit; dropping it discards the copy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::dunning::DunningAttempt;
use crate::domain::foundation::{
    ChargebackId, Currency, DomainError, DunningAttemptId, ErrorCode, PaymentId, PayoutId,
    SubscriptionId, Timestamp, UserId,
};
use crate::domain::ledger::{CreatorWallet, Payout, PayoutStatus};
use crate::domain::payments::{
    FeeSchedule, Payment, PaymentEvent, PaymentPurpose, PaymentStatus, ProviderKind,
};
use crate::domain::risk::{AmlRiskProfile, Chargeback, ChargebackStatus, CreatorAccount, RiskInputs};
use crate::domain::subscription::Subscription;
use crate::ports::{BillingStore, BillingTransaction, SaveResult};

#[derive(Debug, Clone, Default)]
struct StoreState {
    events: HashMap<String, PaymentEvent>,
    payments: HashMap<PaymentId, Payment>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    dunning: HashMap<DunningAttemptId, DunningAttempt>,
    wallets: HashMap<(UserId, Currency), CreatorWallet>,
    payouts: HashMap<PayoutId, Payout>,
    chargebacks: HashMap<ChargebackId, Chargeback>,
    risk_profiles: HashMap<UserId, AmlRiskProfile>,
    accounts: HashMap<UserId, CreatorAccount>,
    fee_overrides: Vec<FeeSchedule>,
}

impl StoreState {
    fn has_open_dunning(&self, subscription_id: SubscriptionId) -> bool {
        self.dunning
            .values()
            .any(|a| a.subscription_id == subscription_id && a.is_open())
    }
}

/// Shared-state store; clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<StoreState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `begin` fail as if the datastore were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    // ─── Inspection helpers (committed state) ────────────────────────

    pub async fn payment(&self, provider: ProviderKind, reference: &str) -> Option<Payment> {
        let state = self.state.lock().await;
        state
            .payments
            .values()
            .find(|p| p.provider == provider && p.matches_reference(reference))
            .cloned()
    }

    pub async fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state.lock().await.subscriptions.get(&id).cloned()
    }

    pub async fn subscriptions_for(&self, fan_id: &UserId) -> Vec<Subscription> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .values()
            .filter(|s| &s.fan_id == fan_id)
            .cloned()
            .collect()
    }

    pub async fn wallet(&self, creator_id: &UserId, currency: &Currency) -> Option<CreatorWallet> {
        let state = self.state.lock().await;
        state
            .wallets
            .get(&(creator_id.clone(), currency.clone()))
            .cloned()
    }

    pub async fn payment_event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// All attempts for a subscription, ordered by attempt number.
    pub async fn dunning_attempts(&self, subscription_id: SubscriptionId) -> Vec<DunningAttempt> {
        let state = self.state.lock().await;
        let mut attempts: Vec<_> = state
            .dunning
            .values()
            .filter(|a| a.subscription_id == subscription_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        attempts
    }

    pub async fn payments_for_subscription(&self, subscription_id: SubscriptionId) -> Vec<Payment> {
        let state = self.state.lock().await;
        let mut payments: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.subscription_id == Some(subscription_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }

    pub async fn payout(&self, id: PayoutId) -> Option<Payout> {
        self.state.lock().await.payouts.get(&id).cloned()
    }

    pub async fn chargeback(&self, id: ChargebackId) -> Option<Chargeback> {
        self.state.lock().await.chargebacks.get(&id).cloned()
    }

    pub async fn risk_profile(&self, creator_id: &UserId) -> Option<AmlRiskProfile> {
        self.state.lock().await.risk_profiles.get(creator_id).cloned()
    }

    /// Rewrites a committed subscription, e.g. to move its end date into the past.
    pub async fn modify_subscription<F>(&self, id: SubscriptionId, f: F)
    where
        F: FnOnce(&mut Subscription),
    {
        if let Some(sub) = self.state.lock().await.subscriptions.get_mut(&id) {
            f(sub);
        }
    }

    /// Rewrites a committed dunning attempt.
    pub async fn modify_dunning_attempt<F>(&self, id: DunningAttemptId, f: F)
    where
        F: FnOnce(&mut DunningAttempt),
    {
        if let Some(attempt) = self.state.lock().await.dunning.get_mut(&id) {
            f(attempt);
        }
    }

    pub async fn add_fee_override(&self, schedule: FeeSchedule) {
        self.state.lock().await.fee_overrides.push(schedule);
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::database("in-memory store marked unavailable"));
        }
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

fn not_found(code: ErrorCode, what: &str) -> DomainError {
    DomainError::new(code, format!("{} does not exist", what))
}

#[async_trait]
impl BillingTransaction for InMemoryTransaction {
    async fn payment_event_exists(&mut self, event_id: &str) -> Result<bool, DomainError> {
        Ok(self.working.events.contains_key(event_id))
    }

    async fn append_payment_event(&mut self, event: &PaymentEvent) -> Result<SaveResult, DomainError> {
        if self.working.events.contains_key(&event.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        self.working
            .events
            .insert(event.event_id.clone(), event.clone());
        Ok(SaveResult::Inserted)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        let duplicate = self.working.payments.values().any(|p| {
            p.provider == payment.provider && p.matches_reference(&payment.reference)
        });
        if duplicate {
            return Err(DomainError::new(
                ErrorCode::DuplicateReference,
                format!("payment reference {} already exists", payment.reference),
            ));
        }
        self.working.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment_for_update(
        &mut self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Payment>, DomainError> {
        Ok(self
            .working
            .payments
            .values()
            .find(|p| p.provider == provider && p.matches_reference(reference))
            .cloned())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        match self.working.payments.get_mut(&payment.id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(not_found(ErrorCode::PaymentNotFound, "payment")),
        }
    }

    async fn find_pending_payment(
        &mut self,
        subscription_id: SubscriptionId,
        purpose: PaymentPurpose,
    ) -> Result<Option<Payment>, DomainError> {
        Ok(self
            .working
            .payments
            .values()
            .filter(|p| {
                p.subscription_id == Some(subscription_id)
                    && p.purpose == purpose
                    && p.status == PaymentStatus::Pending
            })
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        self.working
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription_for_update(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self.working.subscriptions.get(&id).cloned())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        match self.working.subscriptions.get_mut(&subscription.id) {
            Some(existing) => {
                *existing = subscription.clone();
                Ok(())
            }
            None => Err(not_found(ErrorCode::SubscriptionNotFound, "subscription")),
        }
    }

    async fn find_active_subscription(
        &mut self,
        fan_id: &UserId,
        creator_id: &UserId,
        tier_name: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .values()
            .find(|s| {
                s.is_active()
                    && &s.fan_id == fan_id
                    && &s.creator_id == creator_id
                    && s.tier_name == tier_name
            })
            .cloned())
    }

    async fn list_due_for_renewal(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let mut due: Vec<_> = self
            .working
            .subscriptions
            .values()
            .filter(|s| {
                s.is_due_for_renewal(now) && !s.is_claimed(now) && !self.working.has_open_dunning(s.id)
            })
            .collect();
        due.sort_by_key(|s| s.end_date);
        Ok(due.into_iter().take(limit as usize).map(|s| s.id).collect())
    }

    async fn list_expired(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .values()
            .filter(|s| s.is_expired(now))
            .take(limit as usize)
            .map(|s| s.id)
            .collect())
    }

    async fn list_stale_checkouts(
        &mut self,
        cutoff: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .values()
            .filter(|s| {
                s.status == crate::domain::subscription::SubscriptionStatus::Pending
                    && s.created_at.is_before(&cutoff)
            })
            .take(limit as usize)
            .map(|s| s.id)
            .collect())
    }

    async fn claim_subscription_for_renewal(
        &mut self,
        id: SubscriptionId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<bool, DomainError> {
        let in_dunning = self.working.has_open_dunning(id);
        match self.working.subscriptions.get_mut(&id) {
            Some(sub) if sub.is_due_for_renewal(now) && !sub.is_claimed(now) && !in_dunning => {
                sub.renewal_claimed_until = Some(until);
                sub.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_dunning_attempt(&mut self, attempt: &DunningAttempt) -> Result<(), DomainError> {
        self.working.dunning.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn update_dunning_attempt(&mut self, attempt: &DunningAttempt) -> Result<(), DomainError> {
        self.working.dunning.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn find_open_dunning_attempt(
        &mut self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<DunningAttempt>, DomainError> {
        Ok(self
            .working
            .dunning
            .values()
            .filter(|a| a.subscription_id == subscription_id && a.is_open())
            .max_by_key(|a| a.attempt_number)
            .cloned())
    }

    async fn list_due_dunning_attempts(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningAttemptId>, DomainError> {
        let mut due: Vec<_> = self
            .working
            .dunning
            .values()
            .filter(|a| a.is_due(now) && !a.is_claimed(now))
            .collect();
        due.sort_by_key(|a| a.scheduled_at);
        Ok(due.into_iter().take(limit as usize).map(|a| a.id).collect())
    }

    async fn claim_dunning_attempt(
        &mut self,
        id: DunningAttemptId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<DunningAttempt>, DomainError> {
        match self.working.dunning.get_mut(&id) {
            Some(attempt) if attempt.is_due(now) && !attempt.is_claimed(now) => {
                attempt.claimed_until = Some(until);
                attempt.updated_at = now;
                Ok(Some(attempt.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_wallet_for_update(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
    ) -> Result<Option<CreatorWallet>, DomainError> {
        Ok(self
            .working
            .wallets
            .get(&(creator_id.clone(), currency.clone()))
            .cloned())
    }

    async fn ensure_wallet_for_update(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
        now: Timestamp,
    ) -> Result<CreatorWallet, DomainError> {
        Ok(self
            .working
            .wallets
            .entry((creator_id.clone(), currency.clone()))
            .or_insert_with(|| CreatorWallet::new(creator_id.clone(), currency.clone(), now))
            .clone())
    }

    async fn list_wallets_for_update(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Vec<CreatorWallet>, DomainError> {
        Ok(self
            .working
            .wallets
            .values()
            .filter(|w| &w.creator_id == creator_id)
            .cloned()
            .collect())
    }

    async fn save_wallet(&mut self, wallet: &CreatorWallet) -> Result<(), DomainError> {
        match self
            .working
            .wallets
            .get_mut(&(wallet.creator_id.clone(), wallet.currency.clone()))
        {
            Some(stored) => {
                *stored = wallet.clone();
                Ok(())
            }
            None => Err(not_found(ErrorCode::WalletNotFound, "wallet")),
        }
    }

    async fn insert_payout(&mut self, payout: &Payout) -> Result<(), DomainError> {
        self.working.payouts.insert(payout.id, payout.clone());
        Ok(())
    }

    async fn update_payout(&mut self, payout: &Payout) -> Result<(), DomainError> {
        match self.working.payouts.get_mut(&payout.id) {
            Some(existing) => {
                *existing = payout.clone();
                Ok(())
            }
            None => Err(not_found(ErrorCode::PayoutNotFound, "payout")),
        }
    }

    async fn find_payout_for_update(&mut self, id: PayoutId) -> Result<Option<Payout>, DomainError> {
        Ok(self.working.payouts.get(&id).cloned())
    }

    async fn sum_payouts_since(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
        since: Timestamp,
    ) -> Result<i64, DomainError> {
        Ok(self
            .working
            .payouts
            .values()
            .filter(|p| {
                &p.creator_id == creator_id
                    && &p.currency == currency
                    && p.status != PayoutStatus::Failed
                    && !p.requested_at.is_before(&since)
            })
            .map(|p| p.amount)
            .sum())
    }

    async fn insert_chargeback(&mut self, chargeback: &Chargeback) -> Result<(), DomainError> {
        self.working
            .chargebacks
            .insert(chargeback.id, chargeback.clone());
        Ok(())
    }

    async fn update_chargeback(&mut self, chargeback: &Chargeback) -> Result<(), DomainError> {
        match self.working.chargebacks.get_mut(&chargeback.id) {
            Some(existing) => {
                *existing = chargeback.clone();
                Ok(())
            }
            None => Err(not_found(ErrorCode::ChargebackNotFound, "chargeback")),
        }
    }

    async fn find_chargeback_for_update(
        &mut self,
        id: ChargebackId,
    ) -> Result<Option<Chargeback>, DomainError> {
        Ok(self.working.chargebacks.get(&id).cloned())
    }

    async fn risk_inputs(
        &mut self,
        creator_id: &UserId,
        now: Timestamp,
    ) -> Result<RiskInputs, DomainError> {
        let succeeded: Vec<_> = self
            .working
            .payments
            .values()
            .filter(|p| &p.creator_id == creator_id && p.status == PaymentStatus::Success)
            .collect();
        let chargebacks: Vec<_> = self
            .working
            .chargebacks
            .values()
            .filter(|c| &c.creator_id == creator_id)
            .collect();
        let account = self.working.accounts.get(creator_id);

        Ok(RiskInputs {
            successful_payments: succeeded.len() as u64,
            successful_volume: succeeded.iter().map(|p| p.amount).sum(),
            chargebacks: chargebacks.len() as u64,
            lost_chargebacks: chargebacks
                .iter()
                .filter(|c| c.status == ChargebackStatus::Lost)
                .count() as u64,
            open_chargebacks: chargebacks
                .iter()
                .filter(|c| c.status == ChargebackStatus::Open)
                .count() as u64,
            account_age_days: account.map(|a| a.age_days(now)).unwrap_or(0),
            kyc_status: account.map(|a| a.kyc_status),
        })
    }

    async fn find_risk_profile(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Option<AmlRiskProfile>, DomainError> {
        Ok(self.working.risk_profiles.get(creator_id).cloned())
    }

    async fn save_risk_profile(&mut self, profile: &AmlRiskProfile) -> Result<(), DomainError> {
        self.working
            .risk_profiles
            .insert(profile.creator_id.clone(), profile.clone());
        Ok(())
    }

    async fn find_creator_account(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Option<CreatorAccount>, DomainError> {
        Ok(self.working.accounts.get(creator_id).cloned())
    }

    async fn save_creator_account(&mut self, account: &CreatorAccount) -> Result<(), DomainError> {
        self.working
            .accounts
            .insert(account.creator_id.clone(), account.clone());
        Ok(())
    }

    async fn current_fee_schedule(&mut self) -> Result<Option<FeeSchedule>, DomainError> {
        Ok(self
            .working
            .fee_overrides
            .iter()
            .max_by_key(|f| f.version)
            .copied())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}
