//! Scriptable gateway for tests and local runs.
//!
//! Supports:
//! - Queued charge, verify, and payout results
//! - Signature acceptance toggling
//! - Call tracking
//!
//! Webhook payloads are the canonical event itself, serialized as JSON, and
//! the signature must equal the configured secret.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::common::constant_time_eq;
use crate::domain::payments::{CanonicalEvent, CanonicalStatus, ProviderKind};
use crate::ports::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PayoutRequest, PayoutResult,
};

pub const MOCK_SIGNATURE_HEADER: &str = "x-mock-signature";

#[derive(Clone)]
pub struct MockGateway {
    kind: ProviderKind,
    secret: String,
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    charge_results: VecDeque<Result<ChargeResult, GatewayError>>,
    verify_results: VecDeque<Result<CanonicalStatus, GatewayError>>,
    payout_results: VecDeque<Result<PayoutResult, GatewayError>>,
    cancel_error: Option<GatewayError>,
    charges: Vec<ChargeRequest>,
    verifications: Vec<String>,
    payouts: Vec<PayoutRequest>,
    cancellations: Vec<String>,
}

impl MockGateway {
    pub fn new(kind: ProviderKind) -> Self {
        Self::with_secret(kind, "mock-secret")
    }

    pub fn with_secret(kind: ProviderKind, secret: impl Into<String>) -> Self {
        Self {
            kind,
            secret: secret.into(),
            inner: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Scripting
    // ════════════════════════════════════════════════════════════════════════════

    pub fn push_charge(&self, result: Result<ChargeResult, GatewayError>) {
        self.state().charge_results.push_back(result);
    }

    pub fn push_charge_status(&self, status: CanonicalStatus) {
        self.push_charge(Ok(ChargeResult {
            status,
            provider_reference: None,
        }));
    }

    pub fn push_verify(&self, result: Result<CanonicalStatus, GatewayError>) {
        self.state().verify_results.push_back(result);
    }

    pub fn push_payout(&self, result: Result<PayoutResult, GatewayError>) {
        self.state().payout_results.push_back(result);
    }

    pub fn fail_cancellations(&self, error: GatewayError) {
        self.state().cancel_error = Some(error);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertions
    // ════════════════════════════════════════════════════════════════════════════

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.state().charges.clone()
    }

    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }

    pub fn verifications(&self) -> Vec<String> {
        self.state().verifications.clone()
    }

    pub fn payouts(&self) -> Vec<PayoutRequest> {
        self.state().payouts.clone()
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.state().cancellations.clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn signature_header(&self) -> &'static str {
        MOCK_SIGNATURE_HEADER
    }

    fn verify_signature(&self, _payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        if constant_time_eq(self.secret.as_bytes(), signature.as_bytes()) {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature)
        }
    }

    fn normalize(&self, payload: &[u8]) -> Result<Option<CanonicalEvent>, GatewayError> {
        let mut event: CanonicalEvent = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        event.provider = self.kind;
        Ok(Some(event))
    }

    /// Defaults to pending when nothing is queued.
    async fn verify_payment(&self, reference: &str) -> Result<CanonicalStatus, GatewayError> {
        let mut state = self.state();
        state.verifications.push(reference.to_string());
        state
            .verify_results
            .pop_front()
            .unwrap_or(Ok(CanonicalStatus::Pending))
    }

    /// Defaults to success when nothing is queued.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError> {
        let mut state = self.state();
        state.charges.push(request.clone());
        state.charge_results.pop_front().unwrap_or_else(|| {
            Ok(ChargeResult {
                status: CanonicalStatus::Success,
                provider_reference: Some(format!("mock-{}", request.reference)),
            })
        })
    }

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutResult, GatewayError> {
        let mut state = self.state();
        state.payouts.push(request.clone());
        state.payout_results.pop_front().unwrap_or_else(|| {
            Ok(PayoutResult {
                success: true,
                provider_reference: format!("mock-payout-{}", request.reference),
                status: CanonicalStatus::Success,
            })
        })
    }

    async fn cancel_subscription(&self, reference: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.cancellations.push(reference.to_string());
        match &state.cancel_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
