//! HTTP integration tests for the billing router.
//!
//! Requests go through the full axum stack with `oneshot`:
//! webhooks, scheduler jobs, and the authenticated API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use creator_billing::adapters::auth::MockSessionValidator;
use creator_billing::adapters::http::middleware::JOB_SECRET_HEADER;
use creator_billing::adapters::http::{billing_router, BillingAppState};
use creator_billing::adapters::memory::InMemoryBillingStore;
use creator_billing::adapters::notify::RecordingNotifier;
use creator_billing::adapters::providers::{MockGateway, ProviderRouter, MOCK_SIGNATURE_HEADER};
use creator_billing::application::BillingSettings;
use creator_billing::domain::foundation::{Currency, Role};
use creator_billing::domain::payments::{
    CanonicalEvent, CanonicalEventType, CanonicalStatus, PaymentStatus, ProviderKind,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

const JOB_SECRET: &str = "job-secret";

struct TestApp {
    app: Router,
    store: InMemoryBillingStore,
}

fn test_app() -> TestApp {
    let store = InMemoryBillingStore::new();
    let router = ProviderRouter::new().with_gateway(Arc::new(MockGateway::new(ProviderKind::Stripe)));
    let state = BillingAppState::build(
        Arc::new(store.clone()),
        Arc::new(router),
        Arc::new(RecordingNotifier::new()),
        BillingSettings::default(),
        SecretString::new(JOB_SECRET.to_string()),
    );
    let validator = MockSessionValidator::new()
        .with_user("fan-token", "fan-1", Role::Fan)
        .with_user("creator-token", "creator-1", Role::Creator)
        .with_user("admin-token", "admin-1", Role::Admin);
    TestApp {
        app: billing_router(state, Arc::new(validator)),
        store,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn webhook_request(provider: &str, signature: &str, event: &CanonicalEvent) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}", provider))
        .header(MOCK_SIGNATURE_HEADER, signature)
        .body(Body::from(serde_json::to_vec(event).unwrap()))
        .unwrap()
}

fn job_request(path: &str, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(secret) = secret {
        builder = builder.header(JOB_SECRET_HEADER, secret);
    }
    builder.body(Body::empty()).unwrap()
}

fn success_event(reference: &str, amount: i64) -> CanonicalEvent {
    CanonicalEvent {
        provider: ProviderKind::Stripe,
        event_type: CanonicalEventType::Payment,
        event: "payment_intent.succeeded".to_string(),
        provider_event_id: Some("evt_http".to_string()),
        reference: reference.to_string(),
        status: CanonicalStatus::Success,
        amount,
        currency: Currency::new("USD").unwrap(),
        metadata: BTreeMap::new(),
    }
}

fn checkout_body() -> Value {
    json!({
        "creator_id": "creator-1",
        "tier_name": "gold",
        "tier_price": 5000,
        "country": "US"
    })
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn health_is_public() {
    let t = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn signed_webhook_settles_checkout() {
    let t = test_app();
    let (status, checkout) = send(
        &t.app,
        json_request("POST", "/api/checkout", Some("fan-token"), checkout_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reference = checkout["reference"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        webhook_request("stripe", "mock-secret", &success_event(&reference, 5000)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    let payment = t.store.payment(ProviderKind::Stripe, &reference).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_side_effects() {
    let t = test_app();

    let (status, body) = send(
        &t.app,
        webhook_request("stripe", "forged", &success_event("ref-1", 5000)),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["retryable"], false);
    assert_eq!(t.store.payment_event_count().await, 0);
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let t = test_app();

    let (status, _) = send(
        &t.app,
        webhook_request("paypal", "mock-secret", &success_event("ref-1", 5000)),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unconfigured_provider_is_unavailable() {
    let t = test_app();

    let (status, body) = send(
        &t.app,
        webhook_request("paystack", "mock-secret", &success_event("ref-1", 5000)),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_acknowledged() {
    let t = test_app();

    let (status, body) = send(
        &t.app,
        webhook_request("stripe", "mock-secret", &success_event("nobody", 5000)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}

// =============================================================================
// Jobs
// =============================================================================

#[tokio::test]
async fn jobs_require_the_shared_secret() {
    let t = test_app();

    let (missing, _) = send(&t.app, job_request("/jobs/renewal-scan", None)).await;
    let (wrong, _) = send(&t.app, job_request("/jobs/dunning-sweep", Some("nope"))).await;

    assert_eq!(missing, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn renewal_scan_returns_report() {
    let t = test_app();

    let (status, body) = send(&t.app, job_request("/jobs/renewal-scan", Some(JOB_SECRET))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["due"], 0);
    assert_eq!(body["renewed"], 0);
}

#[tokio::test]
async fn dunning_sweep_returns_report() {
    let t = test_app();

    let (status, body) = send(&t.app, job_request("/jobs/dunning-sweep", Some(JOB_SECRET))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exhausted"], 0);
}

// =============================================================================
// Authenticated API
// =============================================================================

#[tokio::test]
async fn checkout_requires_a_session() {
    let t = test_app();

    let (status, body) = send(&t.app, json_request("POST", "/api/checkout", None, checkout_body())).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn checkout_with_unknown_token_is_rejected() {
    let t = test_app();

    let (status, _) = send(
        &t.app,
        json_request("POST", "/api/checkout", Some("stolen"), checkout_body()),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn checkout_routes_us_fans_to_stripe() {
    let t = test_app();

    let (status, body) = send(
        &t.app,
        json_request("POST", "/api/checkout", Some("fan-token"), checkout_body()),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["provider"], "stripe");
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["amount"], 5000);
}

#[tokio::test]
async fn fans_cannot_request_payouts() {
    let t = test_app();

    let (status, _) = send(
        &t.app,
        json_request(
            "POST",
            "/api/payouts",
            Some("fan-token"),
            json!({ "amount": 1000, "currency": "USD", "destination": "acct_1" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_routes_reject_non_admins() {
    let t = test_app();

    let (status, _) = send(
        &t.app,
        json_request(
            "POST",
            "/api/admin/chargebacks",
            Some("fan-token"),
            json!({ "provider": "stripe", "payment_reference": "ref-1" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_chargeback_on_unknown_payment_is_not_found() {
    let t = test_app();

    let (status, _) = send(
        &t.app,
        json_request(
            "POST",
            "/api/admin/chargebacks",
            Some("admin-token"),
            json!({ "provider": "stripe", "payment_reference": "ref-1" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
