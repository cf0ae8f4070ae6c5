//! Provider router port: the single normalized entry point to all providers.

use async_trait::async_trait;

use super::{ChargeRequest, ChargeResult, PayoutRequest, PayoutResult};
use crate::domain::payments::{BillingError, CanonicalEvent, CanonicalStatus, ProviderKind};

/// Dispatches to the adapter for a provider and maps adapter errors into
/// the billing taxonomy. Holds no business state.
#[async_trait]
pub trait PaymentRouter: Send + Sync {
    /// Providers with credentials configured.
    fn enabled_providers(&self) -> Vec<ProviderKind>;

    fn signature_header(&self, provider: ProviderKind) -> Result<&'static str, BillingError>;

    /// Verifies then normalizes a webhook. Never normalizes unverified input.
    fn process_webhook(
        &self,
        provider: ProviderKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<CanonicalEvent>, BillingError>;

    async fn verify_payment(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<CanonicalStatus, BillingError>;

    async fn charge(
        &self,
        provider: ProviderKind,
        request: &ChargeRequest,
    ) -> Result<ChargeResult, BillingError>;

    async fn initiate_payout(
        &self,
        provider: ProviderKind,
        request: &PayoutRequest,
    ) -> Result<PayoutResult, BillingError>;

    async fn cancel_subscription(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<(), BillingError>;
}
