//! Billing policy configuration: fees, periods, claims, and dunning.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::domain::dunning::DunningPolicy;
use crate::domain::payments::FeeSchedule;

/// Core billing knobs
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Platform fee in basis points (1000 = 10%)
    #[serde(default = "default_platform_fee_bps")]
    pub platform_fee_bps: u32,

    /// Length of one subscription period in days
    #[serde(default = "default_billing_period_days")]
    pub billing_period_days: i64,

    /// Pending checkouts older than this are cancelled by the renewal scan
    #[serde(default = "default_pending_checkout_timeout_hours")]
    pub pending_checkout_timeout_hours: i64,

    /// How long a renewal or dunning claim is held before another runner may take it
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: i64,

    /// Maximum rows handled per scheduler invocation
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: u32,

    /// Timeout for outbound provider API calls
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl BillingConfig {
    /// Default fee schedule injected into the webhook processor.
    pub fn fee_schedule(&self) -> Result<FeeSchedule, ValidationError> {
        FeeSchedule::new(self.platform_fee_bps, 0).map_err(|_| ValidationError::InvalidPlatformFee)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.fee_schedule()?;
        if self.billing_period_days < 1 {
            return Err(ValidationError::InvalidBillingPeriod);
        }
        if self.provider_timeout_secs == 0 || self.claim_ttl_secs <= 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        // A claim must outlive the provider call it protects.
        if (self.claim_ttl_secs as u64) <= self.provider_timeout_secs {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: default_platform_fee_bps(),
            billing_period_days: default_billing_period_days(),
            pending_checkout_timeout_hours: default_pending_checkout_timeout_hours(),
            claim_ttl_secs: default_claim_ttl_secs(),
            scan_batch_size: default_scan_batch_size(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Dunning retry curve
#[derive(Debug, Clone, Deserialize)]
pub struct DunningConfig {
    /// Days to wait before each retry; the last value repeats
    #[serde(default = "default_backoff_days")]
    pub backoff_days: Vec<u32>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl DunningConfig {
    pub fn policy(&self) -> Result<DunningPolicy, ValidationError> {
        if self.backoff_days.is_empty() {
            return Err(ValidationError::EmptyBackoffSchedule);
        }
        DunningPolicy::new(self.backoff_days.clone(), self.max_attempts)
            .map_err(|_| ValidationError::InvalidMaxAttempts)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.policy().map(|_| ())
    }
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            backoff_days: default_backoff_days(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_platform_fee_bps() -> u32 {
    1000
}

fn default_billing_period_days() -> i64 {
    30
}

fn default_pending_checkout_timeout_hours() -> i64 {
    24
}

fn default_claim_ttl_secs() -> i64 {
    300
}

fn default_scan_batch_size() -> u32 {
    100
}

fn default_provider_timeout_secs() -> u64 {
    20
}

fn default_backoff_days() -> Vec<u32> {
    vec![1, 3, 7]
}

fn default_max_attempts() -> u32 {
    3
}
