//! Checkout - creates the pending payment and subscription a provider
//! webhook later settles.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::foundation::{
    AuthenticatedUser, CountryCode, Currency, PaymentId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::payments::{
    select_enabled_provider, BillingError, NewPayment, Payment, PaymentPurpose, PaymentStatus,
    ProviderKind,
};
use crate::domain::subscription::{NewSubscription, Subscription};
use crate::ports::{BillingStore, BillingTransaction, PaymentRouter};

/// Attaches a provider-assigned reference to a still-pending payment so
/// webhooks carrying only that reference resolve to it.
pub(crate) async fn attach_provider_reference_in(
    tx: &mut dyn BillingTransaction,
    provider: ProviderKind,
    reference: &str,
    provider_reference: &str,
    now: Timestamp,
) -> Result<Payment, BillingError> {
    let mut payment = tx
        .find_payment_for_update(provider, reference)
        .await?
        .ok_or(BillingError::NotFound("Payment"))?;
    if payment.provider_reference.as_deref() == Some(provider_reference) {
        return Ok(payment);
    }
    if payment.status != PaymentStatus::Pending {
        return Err(BillingError::InvalidTransition(format!(
            "payment {} is {}",
            payment.reference,
            payment.status.as_str()
        )));
    }
    payment.provider_reference = Some(provider_reference.to_string());
    payment.updated_at = now;
    tx.update_payment(&payment).await?;
    tracing::debug!(
        provider = %provider,
        reference = %payment.reference,
        provider_reference,
        "provider reference attached"
    );
    Ok(payment)
}

#[derive(Debug, Clone)]
pub struct StartCheckoutCommand {
    pub creator_id: UserId,
    pub tier_name: String,
    /// Minor units of `requested_currency`, or of the country's currency
    /// when none is requested.
    pub tier_price: i64,
    pub country: CountryCode,
    pub requested_currency: Option<Currency>,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub subscription_id: SubscriptionId,
    pub payment_id: PaymentId,
    pub provider: ProviderKind,
    pub currency: Currency,
    pub amount: i64,
    /// Reference the client hands to the provider; webhooks echo it back.
    pub reference: String,
}

pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    router: Arc<dyn PaymentRouter>,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn BillingStore>, router: Arc<dyn PaymentRouter>) -> Self {
        Self { store, router }
    }

    pub async fn start_checkout(
        &self,
        fan: &AuthenticatedUser,
        cmd: StartCheckoutCommand,
    ) -> Result<CheckoutSession, BillingError> {
        let selection = select_enabled_provider(
            &cmd.country,
            cmd.requested_currency.as_ref(),
            &self.router.enabled_providers(),
        )
        .ok_or_else(|| BillingError::Configuration("no payment provider enabled".to_string()))?;

        // Prices are not converted between currencies.
        if let Some(requested) = &cmd.requested_currency {
            if requested != &selection.currency {
                return Err(BillingError::UnsupportedCurrency {
                    provider: selection.provider,
                    currency: requested.to_string(),
                });
            }
        }

        let now = Timestamp::now();
        let reference = format!("chk-{}", Uuid::new_v4().simple());

        let mut tx = self.store.begin().await?;
        if tx
            .find_active_subscription(&fan.id, &cmd.creator_id, &cmd.tier_name)
            .await?
            .is_some()
        {
            return Err(BillingError::ActiveSubscriptionExists);
        }

        let subscription = Subscription::pending(
            NewSubscription {
                fan_id: fan.id.clone(),
                creator_id: cmd.creator_id.clone(),
                tier_name: cmd.tier_name.clone(),
                tier_price: cmd.tier_price,
                currency: selection.currency.clone(),
                payment_provider: selection.provider,
                payment_reference: reference.clone(),
                auto_renew: cmd.auto_renew,
            },
            now,
        )?;
        let payment = Payment::new(
            NewPayment {
                payer_id: fan.id.clone(),
                creator_id: cmd.creator_id,
                amount: cmd.tier_price,
                currency: selection.currency.clone(),
                provider: selection.provider,
                reference: reference.clone(),
                tier_name: cmd.tier_name,
                purpose: PaymentPurpose::Checkout,
                subscription_id: Some(subscription.id),
            },
            now,
        )?;
        tx.insert_subscription(&subscription).await?;
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription.id,
            provider = %selection.provider,
            currency = %selection.currency,
            amount = payment.amount,
            reference = %reference,
            "checkout started"
        );

        Ok(CheckoutSession {
            subscription_id: subscription.id,
            payment_id: payment.id,
            provider: selection.provider,
            currency: selection.currency,
            amount: payment.amount,
            reference,
        })
    }

    /// Records the provider's id for a checkout payment (for example an
    /// M-Pesa CheckoutRequestID).
    pub async fn record_provider_reference(
        &self,
        fan: &AuthenticatedUser,
        provider: ProviderKind,
        reference: &str,
        provider_reference: &str,
    ) -> Result<(), BillingError> {
        let mut tx = self.store.begin().await?;
        let payment = tx
            .find_payment_for_update(provider, reference)
            .await?
            .ok_or(BillingError::NotFound("Payment"))?;
        if payment.payer_id != fan.id {
            return Err(BillingError::NotFound("Payment"));
        }
        attach_provider_reference_in(&mut *tx, provider, reference, provider_reference, Timestamp::now())
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::providers::{MockGateway, ProviderRouter};
    use crate::domain::foundation::Role;
    use crate::domain::subscription::SubscriptionStatus;

    fn fan() -> AuthenticatedUser {
        AuthenticatedUser::new(UserId::new("fan-1").unwrap(), Role::Fan)
    }

    fn service(store: &InMemoryBillingStore, providers: &[ProviderKind]) -> CheckoutService {
        let router = providers.iter().fold(ProviderRouter::new(), |router, kind| {
            router.with_gateway(Arc::new(MockGateway::new(*kind)))
        });
        CheckoutService::new(Arc::new(store.clone()), Arc::new(router))
    }

    fn command(country: &str, currency: Option<&str>) -> StartCheckoutCommand {
        StartCheckoutCommand {
            creator_id: UserId::new("creator-1").unwrap(),
            tier_name: "gold".to_string(),
            tier_price: 5000,
            country: CountryCode::new(country).unwrap(),
            requested_currency: currency.map(|c| Currency::new(c).unwrap()),
            auto_renew: true,
        }
    }

    #[tokio::test]
    async fn checkout_creates_pending_pair() {
        let store = InMemoryBillingStore::new();
        let checkout = service(&store, &[ProviderKind::Stripe, ProviderKind::Paystack]);

        let session = checkout.start_checkout(&fan(), command("NG", None)).await.unwrap();
        assert_eq!(session.provider, ProviderKind::Paystack);
        assert_eq!(session.currency.as_str(), "NGN");
        assert!(session.reference.starts_with("chk-"));

        let subscription = store.subscription(session.subscription_id).await.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Pending);
        let payment = store.payment(ProviderKind::Paystack, &session.reference).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.subscription_id, Some(subscription.id));
    }

    #[tokio::test]
    async fn falls_back_to_stripe_when_local_rail_disabled() {
        let store = InMemoryBillingStore::new();
        let checkout = service(&store, &[ProviderKind::Stripe]);
        let session = checkout.start_checkout(&fan(), command("KE", None)).await.unwrap();
        assert_eq!(session.provider, ProviderKind::Stripe);
    }

    #[tokio::test]
    async fn unconvertible_currency_is_rejected() {
        let store = InMemoryBillingStore::new();
        let checkout = service(&store, &[ProviderKind::Mpesa]);
        let result = checkout.start_checkout(&fan(), command("KE", Some("USD"))).await;
        assert!(matches!(result, Err(BillingError::UnsupportedCurrency { .. })));
    }

    #[tokio::test]
    async fn active_subscription_blocks_checkout() {
        let store = InMemoryBillingStore::new();
        let checkout = service(&store, &[ProviderKind::Stripe]);
        let session = checkout.start_checkout(&fan(), command("US", None)).await.unwrap();
        store
            .modify_subscription(session.subscription_id, |s| {
                s.activate(Timestamp::now(), 30, None).unwrap();
            })
            .await;

        let second = checkout.start_checkout(&fan(), command("US", None)).await;
        assert!(matches!(second, Err(BillingError::ActiveSubscriptionExists)));
    }

    #[tokio::test]
    async fn provider_reference_is_attached_for_owner_only() {
        let store = InMemoryBillingStore::new();
        let checkout = service(&store, &[ProviderKind::Mpesa]);
        let session = checkout.start_checkout(&fan(), command("KE", None)).await.unwrap();

        let stranger = AuthenticatedUser::new(UserId::new("fan-2").unwrap(), Role::Fan);
        let denied = checkout
            .record_provider_reference(&stranger, ProviderKind::Mpesa, &session.reference, "ws_CO_1")
            .await;
        assert!(matches!(denied, Err(BillingError::NotFound(_))));

        checkout
            .record_provider_reference(&fan(), ProviderKind::Mpesa, &session.reference, "ws_CO_1")
            .await
            .unwrap();
        let payment = store.payment(ProviderKind::Mpesa, "ws_CO_1").await.unwrap();
        assert_eq!(payment.reference, session.reference);
    }
}
