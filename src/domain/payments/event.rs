//! Append-only payment event log entry; its id is the idempotency barrier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CanonicalEvent, CanonicalEventType, CanonicalStatus, ProviderKind};
use crate::domain::foundation::{Currency, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Idempotency key; unique across the log.
    pub event_id: String,
    pub provider: ProviderKind,
    pub event_type: CanonicalEventType,
    pub event: String,
    pub reference: String,
    pub amount: i64,
    pub currency: Currency,
    pub status: CanonicalStatus,
    pub metadata: BTreeMap<String, String>,
    pub created_at: Timestamp,
}

impl PaymentEvent {
    pub fn record(event: &CanonicalEvent, now: Timestamp) -> Self {
        Self {
            event_id: event.idempotency_key(),
            provider: event.provider,
            event_type: event.event_type,
            event: event.event.clone(),
            reference: event.reference.clone(),
            amount: event.amount,
            currency: event.currency.clone(),
            status: event.status,
            metadata: event.metadata.clone(),
            created_at: now,
        }
    }
}
