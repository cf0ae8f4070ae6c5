//! Provider adapter port.
//!
//! One implementation per payment provider. Adapters own signature
//! verification, payload translation, and the provider's HTTP API; their
//! error vocabulary stops at the router.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::foundation::{Currency, UserId};
use crate::domain::payments::{CanonicalEvent, CanonicalStatus, ProviderKind};

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Name of the HTTP header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Verifies the raw webhook body against the signature header value.
    fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError>;

    /// Translates a verified payload into a canonical event.
    ///
    /// Returns `Ok(None)` for event types that carry no payment outcome.
    fn normalize(&self, payload: &[u8]) -> Result<Option<CanonicalEvent>, GatewayError>;

    /// Polls the provider for the current status of a payment.
    async fn verify_payment(&self, reference: &str) -> Result<CanonicalStatus, GatewayError>;

    /// Charges a stored payment method (renewals and dunning retries).
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError>;

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutResult, GatewayError>;

    /// Stops provider-side recurring billing for a reference.
    async fn cancel_subscription(&self, reference: &str) -> Result<(), GatewayError>;
}

/// Off-session charge against a stored payment method.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Our payment reference; also the provider idempotency key.
    pub reference: String,
    pub payer_id: UserId,
    pub amount: i64,
    pub currency: Currency,
    pub payment_method_token: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeResult {
    pub status: CanonicalStatus,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    /// Our payout id; also the provider idempotency key.
    pub reference: String,
    pub amount: i64,
    pub currency: Currency,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutResult {
    pub success: bool,
    pub provider_reference: String,
    pub status: CanonicalStatus,
}

/// Adapter-level failures.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("signature verification failed")]
    InvalidSignature,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Permanent refusal by the provider.
    #[error("declined: {0}")]
    Declined(String),

    /// Network or provider-side failure; outcome unknown.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request timed out")]
    Timeout,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("provider credentials missing")]
    NotConfigured,
}

impl GatewayError {
    /// Classifies a reqwest failure.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::MalformedPayload(err.to_string())
        } else {
            GatewayError::Transient(err.to_string())
        }
    }

    /// True when the provider may or may not have acted.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::Timeout)
    }
}
