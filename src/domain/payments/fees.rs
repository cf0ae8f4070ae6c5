//! Platform fee schedule.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

const BPS_DENOMINATOR: i128 = 10_000;

/// Platform fee in basis points, with the version of the record it came from.
///
/// Version 0 is the configured default; stored overrides carry higher versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub platform_fee_bps: u32,
    pub version: i32,
}

impl FeeSchedule {
    pub fn new(platform_fee_bps: u32, version: i32) -> Result<Self, ValidationError> {
        if platform_fee_bps as i128 > BPS_DENOMINATOR {
            return Err(ValidationError::out_of_range(
                "platform_fee_bps",
                0,
                BPS_DENOMINATOR as i64,
                platform_fee_bps as i64,
            ));
        }
        Ok(Self {
            platform_fee_bps,
            version,
        })
    }

    /// Fee withheld from `amount`, rounded down.
    pub fn platform_fee(&self, amount: i64) -> i64 {
        if amount <= 0 {
            return 0;
        }
        (amount as i128 * self.platform_fee_bps as i128 / BPS_DENOMINATOR) as i64
    }

    /// Amount credited to the creator.
    pub fn creator_share(&self, amount: i64) -> i64 {
        amount - self.platform_fee(amount)
    }
}

impl Default for FeeSchedule {
    /// 10%, the configured default.
    fn default() -> Self {
        Self {
            platform_fee_bps: 1000,
            version: 0,
        }
    }
}
