//! Request and response bodies for the billing API.

use serde::{Deserialize, Serialize};

use crate::application::{CheckoutSession, OpenChargeback, StartCheckoutCommand};
use crate::domain::foundation::{
    CountryCode, Currency, PaymentId, PayoutId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::ledger::{Payout, PayoutStatus};
use crate::domain::payments::ProviderKind;
use crate::domain::risk::ChargebackResolution;
use crate::domain::subscription::{CancellationReason, Subscription, SubscriptionStatus};

fn default_auto_renew() -> bool {
    true
}

// ════════════════════════════════════════════════════════════════════════════════
// Checkout
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct StartCheckoutRequest {
    pub creator_id: UserId,
    pub tier_name: String,
    /// Minor units.
    pub tier_price: i64,
    pub country: CountryCode,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default = "default_auto_renew")]
    pub auto_renew: bool,
}

impl From<StartCheckoutRequest> for StartCheckoutCommand {
    fn from(req: StartCheckoutRequest) -> Self {
        Self {
            creator_id: req.creator_id,
            tier_name: req.tier_name,
            tier_price: req.tier_price,
            country: req.country,
            requested_currency: req.currency,
            auto_renew: req.auto_renew,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub subscription_id: SubscriptionId,
    pub payment_id: PaymentId,
    pub provider: ProviderKind,
    pub currency: Currency,
    pub amount: i64,
    pub reference: String,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            subscription_id: session.subscription_id,
            payment_id: session.payment_id,
            provider: session.provider,
            currency: session.currency,
            amount: session.amount,
            reference: session.reference,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderReferenceRequest {
    pub provider: ProviderKind,
    pub reference: String,
    pub provider_reference: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════════════════

/// Subscription view without the stored payment-method token.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: SubscriptionId,
    pub creator_id: UserId,
    pub tier_name: String,
    pub tier_price: i64,
    pub currency: Currency,
    pub status: SubscriptionStatus,
    pub end_date: Option<Timestamp>,
    pub auto_renew: bool,
    pub cancellation_reason: Option<CancellationReason>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            creator_id: s.creator_id,
            tier_name: s.tier_name,
            tier_price: s.tier_price,
            currency: s.currency,
            status: s.status,
            end_date: s.end_date,
            auto_renew: s.auto_renew,
            cancellation_reason: s.cancellation_reason,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Payouts
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct RequestPayoutRequest {
    pub amount: i64,
    pub currency: Currency,
    pub destination: String,
}

/// Payout view without the provider's reference.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutResponse {
    pub id: PayoutId,
    pub amount: i64,
    pub currency: Currency,
    pub provider: ProviderKind,
    pub status: PayoutStatus,
    pub failure_reason: Option<String>,
    pub requested_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl From<Payout> for PayoutResponse {
    fn from(p: Payout) -> Self {
        Self {
            id: p.id,
            amount: p.amount,
            currency: p.currency,
            provider: p.provider,
            status: p.status,
            failure_reason: p.failure_reason,
            requested_at: p.requested_at,
            processed_at: p.processed_at,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Disputes
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct OpenChargebackRequest {
    pub provider: ProviderKind,
    pub payment_reference: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<OpenChargebackRequest> for OpenChargeback {
    fn from(req: OpenChargebackRequest) -> Self {
        Self {
            provider: req.provider,
            payment_reference: req.payment_reference,
            amount: req.amount,
            reason: req.reason,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveChargebackRequest {
    pub resolution: ChargebackResolution,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_request_defaults_to_auto_renew() {
        let req: StartCheckoutRequest = serde_json::from_value(serde_json::json!({
            "creator_id": "creator-1",
            "tier_name": "gold",
            "tier_price": 5000,
            "country": "ng"
        }))
        .unwrap();
        assert!(req.auto_renew);
        assert!(req.currency.is_none());
        assert_eq!(req.country.as_str(), "NG");
    }

    #[test]
    fn checkout_request_rejects_bad_currency() {
        let result: Result<StartCheckoutRequest, _> = serde_json::from_value(serde_json::json!({
            "creator_id": "creator-1",
            "tier_name": "gold",
            "tier_price": 5000,
            "country": "NG",
            "currency": "naira"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn resolution_parses_lowercase() {
        let req: ResolveChargebackRequest =
            serde_json::from_value(serde_json::json!({ "resolution": "lost" })).unwrap();
        assert_eq!(req.resolution, ChargebackResolution::Lost);
    }
}
