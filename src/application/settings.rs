//! Resolved billing policy handed to the services at construction.

use crate::config::{BillingConfig, DunningConfig, ValidationError};
use crate::domain::dunning::DunningPolicy;
use crate::domain::foundation::Timestamp;
use crate::domain::payments::FeeSchedule;

#[derive(Debug, Clone)]
pub struct BillingSettings {
    /// Default fee; a stored override wins when present.
    pub fees: FeeSchedule,
    pub billing_period_days: i64,
    pub pending_checkout_timeout_hours: i64,
    pub claim_ttl_secs: i64,
    pub scan_batch_size: u32,
    pub dunning: DunningPolicy,
}

impl BillingSettings {
    pub fn from_config(
        billing: &BillingConfig,
        dunning: &DunningConfig,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            fees: billing.fee_schedule()?,
            billing_period_days: billing.billing_period_days,
            pending_checkout_timeout_hours: billing.pending_checkout_timeout_hours,
            claim_ttl_secs: billing.claim_ttl_secs,
            scan_batch_size: billing.scan_batch_size,
            dunning: dunning.policy()?,
        })
    }

    /// Expiry for a claim taken at `now`.
    pub fn claim_until(&self, now: Timestamp) -> Timestamp {
        now.add_secs(self.claim_ttl_secs)
    }
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            billing_period_days: 30,
            pending_checkout_timeout_hours: 24,
            claim_ttl_secs: 300,
            scan_batch_size: 100,
            dunning: DunningPolicy::default(),
        }
    }
}
