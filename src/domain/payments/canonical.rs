//! Provider-agnostic representation of a payment state change.
//!
//! Every adapter translates its webhook payload into a [`CanonicalEvent`];
//! nothing downstream of the router sees provider field names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ProviderKind;
use crate::domain::foundation::Currency;

/// Metadata key under which adapters report a reusable payment method.
pub const PAYMENT_METHOD_TOKEN_KEY: &str = "payment_method_token";

/// Normalized payment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalStatus {
    Success,
    Failed,
    Pending,
}

impl CanonicalStatus {
    /// Maps a provider status word onto the canonical enum.
    ///
    /// Unknown words are treated as pending so they never advance state.
    pub fn from_provider_status(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "successful" | "completed" | "complete" | "paid" => {
                CanonicalStatus::Success
            }
            "failed" | "failure" | "declined" | "cancelled" | "canceled" | "abandoned"
            | "reversed" | "payment_failed" => CanonicalStatus::Failed,
            _ => CanonicalStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Success => "success",
            CanonicalStatus::Failed => "failed",
            CanonicalStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the event concerns a one-off charge or a recurring subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalEventType {
    Payment,
    Subscription,
}

impl CanonicalEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalEventType::Payment => "payment",
            CanonicalEventType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for CanonicalEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified, normalized provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub provider: ProviderKind,
    pub event_type: CanonicalEventType,
    /// Provider's own event name, e.g. `charge.success`.
    pub event: String,
    /// Provider's delivery id when the payload carries one.
    pub provider_event_id: Option<String>,
    pub reference: String,
    pub status: CanonicalStatus,
    /// Minor units.
    pub amount: i64,
    pub currency: Currency,
    pub metadata: BTreeMap<String, String>,
}

impl CanonicalEvent {
    /// Key that suppresses duplicate application of the same outcome.
    ///
    /// Provider delivery ids are excluded: providers emit several deliveries
    /// (and several event names) for one outcome, and all must collapse.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.provider, self.event_type, self.status, self.reference
        )
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
