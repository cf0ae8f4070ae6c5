//! Risk scoring: a pure function from historical aggregates to limits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::KycStatus;
use crate::domain::foundation::{Timestamp, UserId, ValidationError};

/// Aggregates the score is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RiskInputs {
    pub successful_payments: u64,
    /// Sum of successful payment amounts in minor units, all currencies.
    pub successful_volume: i64,
    pub chargebacks: u64,
    pub lost_chargebacks: u64,
    pub open_chargebacks: u64,
    pub account_age_days: i64,
    pub kyc_status: Option<KycStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    HighChargebackRatio,
    ChargebackLosses,
    OpenDispute,
    NewAccount,
    KycUnverified,
    HighRisk,
}

impl RiskFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlag::HighChargebackRatio => "high_chargeback_ratio",
            RiskFlag::ChargebackLosses => "chargeback_losses",
            RiskFlag::OpenDispute => "open_dispute",
            RiskFlag::NewAccount => "new_account",
            RiskFlag::KycUnverified => "kyc_unverified",
            RiskFlag::HighRisk => "high_risk",
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskFlag {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_chargeback_ratio" => Ok(RiskFlag::HighChargebackRatio),
            "chargeback_losses" => Ok(RiskFlag::ChargebackLosses),
            "open_dispute" => Ok(RiskFlag::OpenDispute),
            "new_account" => Ok(RiskFlag::NewAccount),
            "kyc_unverified" => Ok(RiskFlag::KycUnverified),
            "high_risk" => Ok(RiskFlag::HighRisk),
            other => Err(ValidationError::invalid_format("risk_flag", other)),
        }
    }
}

/// Result of scoring, before it is stamped onto a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    /// 0 (safe) to 100 (block).
    pub score: u8,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub flags: Vec<RiskFlag>,
}

const BASE_SCORE: i64 = 20;
const HIGH_RISK_THRESHOLD: u8 = 70;
const NEW_ACCOUNT_DAYS: i64 = 30;

/// Scores a creator from their history.
pub fn assess(inputs: &RiskInputs) -> RiskAssessment {
    let mut score = BASE_SCORE;
    let mut flags = Vec::new();

    if inputs.kyc_status != Some(KycStatus::Approved) {
        score += 30;
        flags.push(RiskFlag::KycUnverified);
    }

    if inputs.account_age_days < NEW_ACCOUNT_DAYS {
        score += 15;
        flags.push(RiskFlag::NewAccount);
    }

    // Ratio thresholds in integer form: 5% and 1%.
    let payments = inputs.successful_payments.max(1);
    if inputs.chargebacks > 0 {
        if inputs.chargebacks * 100 >= payments * 5 {
            score += 30;
            flags.push(RiskFlag::HighChargebackRatio);
        } else if inputs.chargebacks * 100 >= payments {
            score += 15;
        }
    }

    if inputs.lost_chargebacks > 0 {
        score += (inputs.lost_chargebacks as i64 * 5).min(20);
        flags.push(RiskFlag::ChargebackLosses);
    }

    if inputs.open_chargebacks > 0 {
        score += 10;
        flags.push(RiskFlag::OpenDispute);
    }

    if inputs.successful_payments >= 1000 {
        score -= 15;
    } else if inputs.successful_payments >= 100 {
        score -= 10;
    }

    let score = score.clamp(0, 100) as u8;
    if score >= HIGH_RISK_THRESHOLD {
        flags.push(RiskFlag::HighRisk);
    }

    let (daily_limit, monthly_limit) = limits_for(score);
    RiskAssessment {
        score,
        daily_limit,
        monthly_limit,
        flags,
    }
}

/// Payout limits per band, in minor units of the payout currency.
fn limits_for(score: u8) -> (i64, i64) {
    match score {
        0..=29 => (1_000_000, 10_000_000),
        30..=49 => (500_000, 5_000_000),
        50..=69 => (200_000, 2_000_000),
        _ => (0, 0),
    }
}

/// Stored risk profile for a creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmlRiskProfile {
    pub creator_id: UserId,
    pub risk_score: u8,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub flags: Vec<RiskFlag>,
    pub last_risk_update: Timestamp,
}

impl AmlRiskProfile {
    pub fn from_assessment(creator_id: UserId, assessment: RiskAssessment, now: Timestamp) -> Self {
        Self {
            creator_id,
            risk_score: assessment.score,
            daily_limit: assessment.daily_limit,
            monthly_limit: assessment.monthly_limit,
            flags: assessment.flags,
            last_risk_update: now,
        }
    }

    /// Profile for a creator who has never been scored.
    pub fn unscored(creator_id: UserId, now: Timestamp) -> Self {
        Self::from_assessment(creator_id, assess(&RiskInputs::default()), now)
    }

    pub fn has_flag(&self, flag: RiskFlag) -> bool {
        self.flags.contains(&flag)
    }
}
