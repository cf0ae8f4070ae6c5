//! Shared state for every billing route.

use std::sync::Arc;

use secrecy::SecretString;

use crate::application::{
    BillingSettings, CheckoutService, DunningEngine, LedgerService, RiskEngine,
    SubscriptionLifecycleManager, WebhookEventProcessor,
};
use crate::ports::{BillingStore, Notifier, PaymentRouter};

/// Cloned per request; every dependency is Arc-wrapped.
#[derive(Clone)]
pub struct BillingAppState {
    pub router: Arc<dyn PaymentRouter>,
    pub processor: Arc<WebhookEventProcessor>,
    pub checkout: Arc<CheckoutService>,
    pub lifecycle: Arc<SubscriptionLifecycleManager>,
    pub dunning: Arc<DunningEngine>,
    pub ledger: Arc<LedgerService>,
    pub risk: Arc<RiskEngine>,
    /// Shared secret the scheduler sends in `X-Job-Secret`.
    pub job_secret: Arc<SecretString>,
}

impl BillingAppState {
    /// Wires every service from the ports.
    pub fn build(
        store: Arc<dyn BillingStore>,
        router: Arc<dyn PaymentRouter>,
        notifier: Arc<dyn Notifier>,
        settings: BillingSettings,
        job_secret: SecretString,
    ) -> Self {
        let processor = Arc::new(WebhookEventProcessor::new(
            store.clone(),
            notifier.clone(),
            settings.clone(),
        ));

        Self {
            checkout: Arc::new(CheckoutService::new(store.clone(), router.clone())),
            lifecycle: Arc::new(SubscriptionLifecycleManager::new(
                store.clone(),
                router.clone(),
                processor.clone(),
                notifier.clone(),
                settings.clone(),
            )),
            dunning: Arc::new(DunningEngine::new(
                store.clone(),
                router.clone(),
                processor.clone(),
                settings,
            )),
            ledger: Arc::new(LedgerService::new(
                store.clone(),
                router.clone(),
                notifier.clone(),
            )),
            risk: Arc::new(RiskEngine::new(store, notifier)),
            processor,
            router,
            job_secret: Arc::new(job_secret),
        }
    }
}
