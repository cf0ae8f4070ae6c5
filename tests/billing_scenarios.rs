//! End-to-end billing scenarios against the in-memory store and mock gateway.
//!
//! These drive the services the way the HTTP surface and scheduler do:
//! 1. Webhook redelivery credits exactly once
//! 2. Failed renewals open dunning; exhausted dunning cancels
//! 3. Lost chargebacks floor the wallet at zero and unfreeze it
//! 4. Concurrent renewal scans charge once
//! 5. Unknown charge outcomes are reconciled instead of recharged

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use secrecy::SecretString;

use creator_billing::adapters::http::BillingAppState;
use creator_billing::adapters::memory::InMemoryBillingStore;
use creator_billing::adapters::notify::RecordingNotifier;
use creator_billing::adapters::providers::{MockGateway, ProviderRouter};
use creator_billing::application::{
    BillingSettings, CheckoutSession, OpenChargeback, ProcessOutcome, StartCheckoutCommand,
};
use creator_billing::domain::dunning::DunningOutcome;
use creator_billing::domain::foundation::{
    AuthenticatedUser, CountryCode, Currency, Role, SubscriptionId, Timestamp, UserId,
};
use creator_billing::domain::ledger::CreatorWallet;
use creator_billing::domain::payments::{
    BillingError, CanonicalEvent, CanonicalEventType, CanonicalStatus, FeeSchedule, PaymentPurpose,
    PaymentStatus, ProviderKind, PAYMENT_METHOD_TOKEN_KEY,
};
use creator_billing::domain::risk::{ChargebackResolution, ChargebackStatus};
use creator_billing::domain::subscription::{CancellationReason, SubscriptionStatus};
use creator_billing::ports::{GatewayError, NotificationKind};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    store: InMemoryBillingStore,
    stripe: MockGateway,
    notifier: Arc<RecordingNotifier>,
    state: BillingAppState,
    settings: BillingSettings,
}

fn harness() -> Harness {
    let store = InMemoryBillingStore::new();
    let stripe = MockGateway::new(ProviderKind::Stripe);
    let router = ProviderRouter::new().with_gateway(Arc::new(stripe.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let settings = BillingSettings::default();
    let state = BillingAppState::build(
        Arc::new(store.clone()),
        Arc::new(router),
        notifier.clone(),
        settings.clone(),
        SecretString::new("job-secret".to_string()),
    );
    Harness {
        store,
        stripe,
        notifier,
        state,
        settings,
    }
}

fn fan() -> AuthenticatedUser {
    AuthenticatedUser::new(UserId::new("fan-1").unwrap(), Role::Fan)
}

fn admin() -> AuthenticatedUser {
    AuthenticatedUser::new(UserId::new("admin-1").unwrap(), Role::Admin)
}

fn creator_id() -> UserId {
    UserId::new("creator-1").unwrap()
}

fn usd() -> Currency {
    Currency::new("USD").unwrap()
}

async fn checkout(h: &Harness) -> CheckoutSession {
    h.state
        .checkout
        .start_checkout(
            &fan(),
            StartCheckoutCommand {
                creator_id: creator_id(),
                tier_name: "gold".to_string(),
                tier_price: 5000,
                country: CountryCode::new("US").unwrap(),
                requested_currency: None,
                auto_renew: true,
            },
        )
        .await
        .unwrap()
}

fn success_event(reference: &str) -> CanonicalEvent {
    let mut metadata = BTreeMap::new();
    metadata.insert(PAYMENT_METHOD_TOKEN_KEY.to_string(), "cus_1:pm_1".to_string());
    CanonicalEvent {
        provider: ProviderKind::Stripe,
        event_type: CanonicalEventType::Payment,
        event: "payment_intent.succeeded".to_string(),
        provider_event_id: Some("evt_1".to_string()),
        reference: reference.to_string(),
        status: CanonicalStatus::Success,
        amount: 5000,
        currency: usd(),
        metadata,
    }
}

/// Checkout plus a successful webhook: an active, auto-renewing subscription.
async fn active_subscription(h: &Harness) -> SubscriptionId {
    let session = checkout(h).await;
    let outcome = h
        .state
        .processor
        .process(&success_event(&session.reference))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Activated);
    session.subscription_id
}

async fn make_due(h: &Harness, id: SubscriptionId) {
    h.store
        .modify_subscription(id, |s| s.end_date = Some(Timestamp::now().add_secs(-60)))
        .await;
}

/// Moves the open dunning attempt's schedule into the past.
async fn make_attempt_due(h: &Harness, id: SubscriptionId) {
    let open = h
        .store
        .dunning_attempts(id)
        .await
        .into_iter()
        .find(|a| a.is_open())
        .expect("an open attempt");
    h.store
        .modify_dunning_attempt(open.id, |a| a.scheduled_at = Timestamp::now().add_secs(-60))
        .await;
}

// =============================================================================
// Scenario A: redelivered success credits once
// =============================================================================

#[tokio::test]
async fn redelivered_success_credits_wallet_once() {
    let h = harness();
    let session = checkout(&h).await;
    let event = success_event(&session.reference);

    let first = h.state.processor.process(&event).await.unwrap();
    let second = h.state.processor.process(&event).await.unwrap();

    assert_eq!(first, ProcessOutcome::Activated);
    assert_eq!(second, ProcessOutcome::Duplicate);

    let payment = h
        .store
        .payment(ProviderKind::Stripe, &session.reference)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(h.store.payment_event_count().await, 1);

    let expected = 5000 - h.settings.fees.platform_fee(5000);
    let wallet = h.store.wallet(&creator_id(), &usd()).await.unwrap();
    assert_eq!(wallet.balance, expected);
}

// =============================================================================
// Scenario B: failed renewal opens dunning
// =============================================================================

#[tokio::test]
async fn failed_renewal_schedules_first_dunning_attempt() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    h.stripe.push_charge_status(CanonicalStatus::Failed);

    let report = h.state.lifecycle.run_renewal_scan().await.unwrap();

    assert_eq!(report.due, 1);
    assert_eq!(report.failed, 1);
    let attempts = h.store.dunning_attempts(id).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert!(attempts[0].is_open());

    let subscription = h.store.subscription(id).await.unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(h.notifier.sent().iter().any(|n| matches!(
        n.kind,
        NotificationKind::RenewalFailed { attempt: 1, .. }
    )));
}

#[tokio::test]
async fn successful_renewal_extends_by_one_period() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    let before = h.store.subscription(id).await.unwrap().end_date.unwrap();

    let report = h.state.lifecycle.run_renewal_scan().await.unwrap();

    assert_eq!(report.renewed, 1);
    let after = h.store.subscription(id).await.unwrap();
    assert_eq!(after.status, SubscriptionStatus::Active);
    assert_eq!(after.end_date, Some(before.add_days(h.settings.billing_period_days)));
    assert_eq!(h.stripe.charge_count(), 1);
}

// =============================================================================
// Scenario C: exhausted dunning cancels
// =============================================================================

#[tokio::test]
async fn exhausted_dunning_cancels_subscription() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    h.stripe.push_charge_status(CanonicalStatus::Failed);
    h.state.lifecycle.run_renewal_scan().await.unwrap();

    let max = h.settings.dunning.max_attempts();
    for _ in 0..max {
        make_attempt_due(&h, id).await;
        h.stripe.push_charge_status(CanonicalStatus::Failed);
        h.state.dunning.process_dunning_attempts().await.unwrap();
    }

    let attempts = h.store.dunning_attempts(id).await;
    assert_eq!(attempts.len() as u32, max);
    assert_eq!(attempts.last().unwrap().outcome, DunningOutcome::Exhausted);
    assert!(attempts.iter().all(|a| !a.is_open()));

    let subscription = h.store.subscription(id).await.unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
    assert_eq!(
        subscription.cancellation_reason,
        Some(CancellationReason::DunningExhausted)
    );
}

#[tokio::test]
async fn dunning_retry_success_recovers_subscription() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    h.stripe.push_charge_status(CanonicalStatus::Failed);
    h.state.lifecycle.run_renewal_scan().await.unwrap();

    make_attempt_due(&h, id).await;
    let report = h.state.dunning.process_dunning_attempts().await.unwrap();

    assert_eq!(report.recovered, 1);
    let attempts = h.store.dunning_attempts(id).await;
    assert_eq!(attempts[0].outcome, DunningOutcome::Succeeded);
    assert!(h.store.subscription(id).await.unwrap().is_active());
}

// =============================================================================
// Scenario D: lost chargeback floors the balance
// =============================================================================

#[tokio::test]
async fn lost_chargeback_floors_balance_at_zero() {
    let h = harness();
    let session = checkout(&h).await;
    h.state
        .processor
        .process(&success_event(&session.reference))
        .await
        .unwrap();
    let balance = h.store.wallet(&creator_id(), &usd()).await.unwrap().balance;
    h.state
        .ledger
        .debit(&creator_id(), &usd(), balance - 1500)
        .await
        .unwrap();

    let chargeback = h
        .state
        .risk
        .open_chargeback(
            &admin(),
            OpenChargeback {
                provider: ProviderKind::Stripe,
                payment_reference: session.reference.clone(),
                amount: Some(2000),
                reason: Some("fraudulent".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(h.store.wallet(&creator_id(), &usd()).await.unwrap().frozen);

    h.state
        .risk
        .resolve_chargeback(&admin(), chargeback.id, ChargebackResolution::Lost)
        .await
        .unwrap();

    let wallet = h.store.wallet(&creator_id(), &usd()).await.unwrap();
    assert_eq!(wallet.balance, 0);
    assert!(!wallet.frozen);
    let stored = h.store.chargeback(chargeback.id).await.unwrap();
    assert_eq!(stored.status, ChargebackStatus::Lost);
}

#[tokio::test]
async fn frozen_wallet_blocks_payout_requests() {
    let h = harness();
    let session = checkout(&h).await;
    h.state
        .processor
        .process(&success_event(&session.reference))
        .await
        .unwrap();
    h.state
        .risk
        .open_chargeback(
            &admin(),
            OpenChargeback {
                provider: ProviderKind::Stripe,
                payment_reference: session.reference,
                amount: None,
                reason: None,
            },
        )
        .await
        .unwrap();

    let result = h
        .state
        .ledger
        .request_payout(&creator_id(), 1000, &usd(), "acct_1")
        .await;
    assert!(matches!(result, Err(BillingError::WalletFrozen)));
}

// =============================================================================
// Scenario E: concurrent scans charge once
// =============================================================================

#[tokio::test]
async fn concurrent_renewal_scans_charge_once() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    h.stripe.push_charge_status(CanonicalStatus::Failed);

    let (a, b) = tokio::join!(
        h.state.lifecycle.run_renewal_scan(),
        h.state.lifecycle.run_renewal_scan()
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(h.stripe.charge_count(), 1);
    assert_eq!(a.failed + b.failed, 1);
    assert_eq!(h.store.dunning_attempts(id).await.len(), 1);
}

#[tokio::test]
async fn concurrent_dunning_sweeps_charge_once() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    h.stripe.push_charge_status(CanonicalStatus::Failed);
    h.state.lifecycle.run_renewal_scan().await.unwrap();
    make_attempt_due(&h, id).await;
    let charges_before = h.stripe.charge_count();

    let (a, b) = tokio::join!(
        h.state.dunning.process_dunning_attempts(),
        h.state.dunning.process_dunning_attempts()
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(h.stripe.charge_count(), charges_before + 1);
    assert_eq!(a.recovered + b.recovered, 1);
}

// =============================================================================
// Unknown outcomes and cancellation
// =============================================================================

#[tokio::test]
async fn timed_out_renewal_is_reconciled_not_recharged() {
    let h = harness();
    let id = active_subscription(&h).await;
    make_due(&h, id).await;
    h.stripe.push_charge(Err(GatewayError::Timeout));

    let first = h.state.lifecycle.run_renewal_scan().await.unwrap();
    assert_eq!(first.unresolved, 1);
    assert!(h.store.dunning_attempts(id).await.is_empty());

    // Let the claim lapse, then the provider reports the charge as settled.
    h.store
        .modify_subscription(id, |s| s.renewal_claimed_until = Some(Timestamp::now().add_secs(-1)))
        .await;
    h.stripe.push_verify(Ok(CanonicalStatus::Success));
    let second = h.state.lifecycle.run_renewal_scan().await.unwrap();

    assert_eq!(second.renewed, 1);
    assert_eq!(h.stripe.charge_count(), 1);
    assert_eq!(h.stripe.verifications().len(), 1);
    let renewals: Vec<_> = h
        .store
        .payments_for_subscription(id)
        .await
        .into_iter()
        .filter(|p| p.purpose == PaymentPurpose::Renewal)
        .collect();
    assert_eq!(renewals.len(), 1);
    assert_eq!(renewals[0].status, PaymentStatus::Success);
}

#[tokio::test]
async fn cancel_proceeds_when_provider_refuses() {
    let h = harness();
    let id = active_subscription(&h).await;
    h.stripe
        .fail_cancellations(GatewayError::Declined("no such subscription".to_string()));

    let cancelled = h.state.lifecycle.cancel_subscription(&fan(), id).await.unwrap();

    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(!cancelled.auto_renew);
    assert_eq!(h.stripe.cancellations().len(), 1);
}

#[tokio::test]
async fn cancel_aborts_on_transient_provider_failure() {
    let h = harness();
    let id = active_subscription(&h).await;
    h.stripe
        .fail_cancellations(GatewayError::Transient("503".to_string()));

    let result = h.state.lifecycle.cancel_subscription(&fan(), id).await;

    assert!(matches!(&result, Err(err) if err.is_retryable()));
    let subscriptions = h.store.subscriptions_for(&fan().id).await;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].status, SubscriptionStatus::Active);
}

// =============================================================================
// Properties
// =============================================================================

fn wallet_with(balance: i64) -> CreatorWallet {
    let mut wallet = CreatorWallet::new(creator_id(), usd(), Timestamp::now());
    wallet.credit(balance, Timestamp::now()).unwrap();
    wallet
}

proptest! {
    #[test]
    fn lost_dispute_never_drives_balance_negative(balance in 0i64..1_000_000, disputed in 1i64..2_000_000) {
        let mut wallet = wallet_with(balance);
        wallet.freeze("dispute", Timestamp::now());
        wallet.debit(disputed, Timestamp::now());
        wallet.unfreeze(Timestamp::now());

        prop_assert_eq!(wallet.balance, (balance - disputed).max(0));
        prop_assert!(!wallet.frozen);
    }

    #[test]
    fn won_dispute_leaves_balance_untouched(balance in 0i64..1_000_000) {
        let mut wallet = wallet_with(balance);
        wallet.freeze("dispute", Timestamp::now());
        wallet.unfreeze(Timestamp::now());

        prop_assert_eq!(wallet.balance, balance);
        prop_assert!(!wallet.frozen);
    }

    #[test]
    fn creator_share_and_fee_partition_the_amount(amount in 1i64..10_000_000_000, bps in 0u32..=10_000) {
        let fees = FeeSchedule::new(bps, 1).unwrap();
        let fee = fees.platform_fee(amount);

        prop_assert!(fee >= 0 && fee <= amount);
        prop_assert_eq!(fees.creator_share(amount) + fee, amount);
    }
}
