//! `PaymentRouter` implementation over the configured adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{FlutterwaveGateway, MpesaGateway, PaystackGateway, StripeGateway};
use crate::config::{BillingConfig, ProvidersConfig};
use crate::domain::payments::{BillingError, CanonicalEvent, CanonicalStatus, ProviderKind};
use crate::ports::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PaymentRouter, PayoutRequest,
    PayoutResult,
};

/// Dispatches to one adapter per provider and translates adapter errors.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    gateways: HashMap<ProviderKind, Arc<dyn PaymentGateway>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for the same provider.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    /// Builds adapters for every provider whose credentials are present.
    pub fn from_config(
        providers: &ProvidersConfig,
        billing: &BillingConfig,
    ) -> Result<Self, BillingError> {
        let timeout = billing.provider_timeout();
        let build_failed = |kind: ProviderKind, err: GatewayError| {
            BillingError::Configuration(format!("{} adapter: {}", kind, err))
        };

        let mut router = Self::new();
        if let Some(config) = &providers.stripe {
            let gateway = StripeGateway::new(config, timeout)
                .map_err(|e| build_failed(ProviderKind::Stripe, e))?;
            router = router.with_gateway(Arc::new(gateway));
        }
        if let Some(config) = &providers.paystack {
            let gateway = PaystackGateway::new(config, timeout)
                .map_err(|e| build_failed(ProviderKind::Paystack, e))?;
            router = router.with_gateway(Arc::new(gateway));
        }
        if let Some(config) = &providers.flutterwave {
            let gateway = FlutterwaveGateway::new(config, timeout)
                .map_err(|e| build_failed(ProviderKind::Flutterwave, e))?;
            router = router.with_gateway(Arc::new(gateway));
        }
        if let Some(config) = &providers.mpesa {
            let gateway = MpesaGateway::new(config, timeout)
                .map_err(|e| build_failed(ProviderKind::Mpesa, e))?;
            router = router.with_gateway(Arc::new(gateway));
        }

        if router.gateways.is_empty() {
            return Err(BillingError::Configuration(
                "no payment provider configured".to_string(),
            ));
        }
        Ok(router)
    }

    fn gateway(&self, provider: ProviderKind) -> Result<&Arc<dyn PaymentGateway>, BillingError> {
        self.gateways
            .get(&provider)
            .ok_or(BillingError::ProviderNotConfigured(provider))
    }
}

/// Collapses adapter vocabulary into the billing taxonomy.
fn translate(provider: ProviderKind, err: GatewayError) -> BillingError {
    match err {
        GatewayError::InvalidSignature => BillingError::InvalidSignature,
        GatewayError::MalformedPayload(msg) => BillingError::MalformedPayload(msg),
        GatewayError::Declined(msg) => BillingError::Declined(msg),
        GatewayError::Transient(msg) => BillingError::ProviderUnavailable(msg),
        GatewayError::Timeout => BillingError::ProviderTimeout,
        GatewayError::Unsupported(msg) => BillingError::Validation(msg),
        GatewayError::NotConfigured => BillingError::ProviderNotConfigured(provider),
    }
}

#[async_trait]
impl PaymentRouter for ProviderRouter {
    fn enabled_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.gateways.contains_key(kind))
            .collect()
    }

    fn signature_header(&self, provider: ProviderKind) -> Result<&'static str, BillingError> {
        Ok(self.gateway(provider)?.signature_header())
    }

    fn process_webhook(
        &self,
        provider: ProviderKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<CanonicalEvent>, BillingError> {
        let gateway = self.gateway(provider)?;

        let Some(signature) = signature.filter(|s| !s.trim().is_empty()) else {
            tracing::warn!(provider = %provider, "webhook without signature rejected");
            return Err(BillingError::InvalidSignature);
        };
        gateway
            .verify_signature(payload, signature)
            .map_err(|e| translate(provider, e))?;

        let event = gateway.normalize(payload).map_err(|e| translate(provider, e))?;
        if let Some(event) = &event {
            if event.provider != provider {
                return Err(BillingError::MalformedPayload(
                    "event provider does not match endpoint".to_string(),
                ));
            }
            tracing::debug!(
                provider = %provider,
                reference = %event.reference,
                status = %event.status,
                "webhook normalized"
            );
        }
        Ok(event)
    }

    async fn verify_payment(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<CanonicalStatus, BillingError> {
        self.gateway(provider)?
            .verify_payment(reference)
            .await
            .map_err(|e| translate(provider, e))
    }

    async fn charge(
        &self,
        provider: ProviderKind,
        request: &ChargeRequest,
    ) -> Result<ChargeResult, BillingError> {
        let gateway = self.gateway(provider)?;
        if !provider.supports(&request.currency) {
            return Err(BillingError::UnsupportedCurrency {
                provider,
                currency: request.currency.to_string(),
            });
        }
        gateway.charge(request).await.map_err(|e| {
            tracing::warn!(provider = %provider, reference = %request.reference, error = %e, "charge failed");
            translate(provider, e)
        })
    }

    async fn initiate_payout(
        &self,
        provider: ProviderKind,
        request: &PayoutRequest,
    ) -> Result<PayoutResult, BillingError> {
        let gateway = self.gateway(provider)?;
        if !provider.supports(&request.currency) {
            return Err(BillingError::UnsupportedCurrency {
                provider,
                currency: request.currency.to_string(),
            });
        }
        gateway.initiate_payout(request).await.map_err(|e| {
            tracing::warn!(provider = %provider, payout = %request.reference, error = %e, "payout failed");
            translate(provider, e)
        })
    }

    async fn cancel_subscription(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<(), BillingError> {
        self.gateway(provider)?
            .cancel_subscription(reference)
            .await
            .map_err(|e| translate(provider, e))
    }
}
