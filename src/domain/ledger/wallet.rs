//! Per-creator, per-currency balance.
//!
//! Only the ledger service writes these fields. Every mutation happens in the
//! same transaction as its cause (payment success, chargeback resolution,
//! payout settlement).

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Currency, Timestamp, UserId, ValidationError};
use crate::domain::payments::BillingError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorWallet {
    pub creator_id: UserId,
    pub currency: Currency,
    /// Minor units; never negative.
    pub balance: i64,
    /// Reserved by payout requests that have not settled.
    pub pending_payouts: i64,
    pub frozen: bool,
    pub frozen_reason: Option<String>,
    pub updated_at: Timestamp,
}

impl CreatorWallet {
    pub fn new(creator_id: UserId, currency: Currency, now: Timestamp) -> Self {
        Self {
            creator_id,
            currency,
            balance: 0,
            pending_payouts: 0,
            frozen: false,
            frozen_reason: None,
            updated_at: now,
        }
    }

    /// Balance not already reserved for payouts.
    pub fn available(&self) -> i64 {
        self.balance - self.pending_payouts
    }

    /// Adds funds. Frozen wallets still accept credits.
    pub fn credit(&mut self, amount: i64, now: Timestamp) -> Result<(), ValidationError> {
        if amount < 0 {
            return Err(ValidationError::out_of_range("amount", 0, i64::MAX, amount));
        }
        self.balance = self.balance.saturating_add(amount);
        self.updated_at = now;
        Ok(())
    }

    /// Removes up to `amount`, flooring the balance at zero.
    ///
    /// Returns how much was actually debited.
    pub fn debit(&mut self, amount: i64, now: Timestamp) -> i64 {
        let applied = amount.clamp(0, self.balance);
        self.balance -= applied;
        self.updated_at = now;
        applied
    }

    pub fn freeze(&mut self, reason: impl Into<String>, now: Timestamp) {
        self.frozen = true;
        self.frozen_reason = Some(reason.into());
        self.updated_at = now;
    }

    pub fn unfreeze(&mut self, now: Timestamp) {
        self.frozen = false;
        self.frozen_reason = None;
        self.updated_at = now;
    }

    /// Reserves `amount` for a new payout request.
    pub fn reserve_payout(&mut self, amount: i64, now: Timestamp) -> Result<(), BillingError> {
        if amount <= 0 {
            return Err(BillingError::Validation("Payout amount must be positive".to_string()));
        }
        if self.frozen {
            return Err(BillingError::WalletFrozen);
        }
        if self.available() < amount {
            return Err(BillingError::InsufficientBalance {
                available: self.available().max(0),
                requested: amount,
            });
        }
        self.pending_payouts += amount;
        self.updated_at = now;
        Ok(())
    }

    /// Returns a reservation after the provider declined the payout.
    pub fn release_payout(&mut self, amount: i64, now: Timestamp) {
        self.pending_payouts = (self.pending_payouts - amount).max(0);
        self.updated_at = now;
    }

    /// Settles a paid payout: the funds leave the wallet and the reservation clears.
    pub fn settle_payout(&mut self, amount: i64, now: Timestamp) {
        self.balance = (self.balance - amount).max(0);
        self.pending_payouts = (self.pending_payouts - amount).max(0);
        self.updated_at = now;
    }
}
