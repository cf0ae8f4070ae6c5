//! Payment aggregate: one charge attempt against a provider.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::ProviderKind;
use crate::domain::foundation::{
    Currency, PaymentId, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};

/// Lifecycle of a single payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl StateMachine for PaymentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PaymentStatus::*;
        // Failed -> Success covers providers that settle after reporting a failure.
        matches!(
            (self, target),
            (Pending, Success) | (Pending, Failed) | (Failed, Success)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Pending => vec![Success, Failed],
            Failed => vec![Success],
            Success => vec![],
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ValidationError::invalid_format("payment_status", other)),
        }
    }
}

/// Why a payment exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPurpose {
    /// First charge that activates a pending subscription.
    Checkout,
    /// Recurring charge that extends an active subscription.
    Renewal,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::Checkout => "checkout",
            PaymentPurpose::Renewal => "renewal",
        }
    }
}

impl fmt::Display for PaymentPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentPurpose {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkout" => Ok(PaymentPurpose::Checkout),
            "renewal" => Ok(PaymentPurpose::Renewal),
            other => Err(ValidationError::invalid_format("payment_purpose", other)),
        }
    }
}

/// Input for creating a pending payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payer_id: UserId,
    pub creator_id: UserId,
    pub amount: i64,
    pub currency: Currency,
    pub provider: ProviderKind,
    pub reference: String,
    pub tier_name: String,
    pub purpose: PaymentPurpose,
    pub subscription_id: Option<SubscriptionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub payer_id: UserId,
    pub creator_id: UserId,
    /// Minor units.
    pub amount: i64,
    pub currency: Currency,
    pub provider: ProviderKind,
    /// Our reference, unique per provider.
    pub reference: String,
    /// Reference assigned by the provider when it differs from ours.
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    pub tier_name: String,
    pub purpose: PaymentPurpose,
    pub subscription_id: Option<SubscriptionId>,
    pub metadata: BTreeMap<String, String>,
    pub webhook_received: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Payment {
    /// Creates a pending payment.
    pub fn new(input: NewPayment, now: Timestamp) -> Result<Self, ValidationError> {
        if input.amount <= 0 {
            return Err(ValidationError::out_of_range("amount", 1, i64::MAX, input.amount));
        }
        if input.reference.trim().is_empty() {
            return Err(ValidationError::empty_field("reference"));
        }
        Ok(Self {
            id: PaymentId::new(),
            payer_id: input.payer_id,
            creator_id: input.creator_id,
            amount: input.amount,
            currency: input.currency,
            provider: input.provider,
            reference: input.reference,
            provider_reference: None,
            status: PaymentStatus::Pending,
            tier_name: input.tier_name,
            purpose: input.purpose,
            subscription_id: input.subscription_id,
            metadata: BTreeMap::new(),
            webhook_received: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// True if `reference` is either our reference or the provider's.
    pub fn matches_reference(&self, reference: &str) -> bool {
        self.reference == reference || self.provider_reference.as_deref() == Some(reference)
    }

    /// True if an event's amount and currency agree with what was charged.
    pub fn matches_amount(&self, amount: i64, currency: &Currency) -> bool {
        self.amount == amount && &self.currency == currency
    }

    pub fn mark_succeeded(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PaymentStatus::Success)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PaymentStatus::Failed)?;
        self.updated_at = now;
        Ok(())
    }

    /// Records that a provider webhook referenced this payment.
    pub fn record_webhook(&mut self, metadata: &BTreeMap<String, String>, now: Timestamp) {
        self.webhook_received = true;
        for (k, v) in metadata {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::assert_consistent;

    fn pending() -> Payment {
        Payment::new(
            NewPayment {
                payer_id: UserId::new("fan-1").unwrap(),
                creator_id: UserId::new("creator-1").unwrap(),
                amount: 5000,
                currency: Currency::new("USD").unwrap(),
                provider: ProviderKind::Stripe,
                reference: "ref-1".to_string(),
                tier_name: "gold".to_string(),
                purpose: PaymentPurpose::Checkout,
                subscription_id: Some(SubscriptionId::new()),
            },
            Timestamp::now(),
        )
        .unwrap()
    }

    #[test]
    fn status_machine_is_consistent() {
        assert_consistent(&[PaymentStatus::Pending, PaymentStatus::Success, PaymentStatus::Failed]);
    }

    #[test]
    fn success_is_terminal() {
        assert!(PaymentStatus::Success.is_terminal());
        assert!(!PaymentStatus::Success.can_transition_to(&PaymentStatus::Failed));
    }

    #[test]
    fn pending_payment_can_succeed_once() {
        let mut p = pending();
        p.mark_succeeded(Timestamp::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Success);
        assert!(p.mark_succeeded(Timestamp::now()).is_err());
    }

    #[test]
    fn failed_payment_can_settle_late() {
        let mut p = pending();
        p.mark_failed(Timestamp::now()).unwrap();
        p.mark_succeeded(Timestamp::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Success);
    }

    #[test]
    fn rejects_non_positive_amount() {
        let mut input = NewPayment {
            payer_id: UserId::new("fan").unwrap(),
            creator_id: UserId::new("creator").unwrap(),
            amount: 0,
            currency: Currency::new("USD").unwrap(),
            provider: ProviderKind::Stripe,
            reference: "r".to_string(),
            tier_name: "t".to_string(),
            purpose: PaymentPurpose::Renewal,
            subscription_id: None,
        };
        assert!(Payment::new(input.clone(), Timestamp::now()).is_err());
        input.amount = 1;
        input.reference = " ".to_string();
        assert!(Payment::new(input, Timestamp::now()).is_err());
    }

    #[test]
    fn matches_provider_reference() {
        let mut p = pending();
        p.provider_reference = Some("ws_CO_123".to_string());
        assert!(p.matches_reference("ref-1"));
        assert!(p.matches_reference("ws_CO_123"));
        assert!(!p.matches_reference("other"));
    }

    #[test]
    fn record_webhook_keeps_existing_metadata() {
        let mut p = pending();
        p.metadata.insert("k".into(), "original".into());
        let mut incoming = BTreeMap::new();
        incoming.insert("k".to_string(), "new".to_string());
        incoming.insert("channel".to_string(), "card".to_string());
        p.record_webhook(&incoming, Timestamp::now());
        assert!(p.webhook_received);
        assert_eq!(p.metadata["k"], "original");
        assert_eq!(p.metadata["channel"], "card");
    }
}
