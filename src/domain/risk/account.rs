//! Creator onboarding facts the risk engine reads.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::{Timestamp, UserId, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for KycStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(KycStatus::Pending),
            "approved" => Ok(KycStatus::Approved),
            "rejected" => Ok(KycStatus::Rejected),
            other => Err(ValidationError::invalid_format("kyc_status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorAccount {
    pub creator_id: UserId,
    pub kyc_status: KycStatus,
    pub created_at: Timestamp,
    pub kyc_approved_at: Option<Timestamp>,
}

impl CreatorAccount {
    pub fn new(creator_id: UserId, now: Timestamp) -> Self {
        Self {
            creator_id,
            kyc_status: KycStatus::Pending,
            created_at: now,
            kyc_approved_at: None,
        }
    }

    pub fn approve_kyc(&mut self, now: Timestamp) {
        self.kyc_status = KycStatus::Approved;
        self.kyc_approved_at = Some(now);
    }

    pub fn age_days(&self, now: Timestamp) -> i64 {
        now.duration_since(&self.created_at).num_days().max(0)
    }
}
