//! Stripe adapter (card processor).
//!
//! Renewals are platform-driven: each charge is an off-session
//! PaymentIntent confirmed against the stored payment method, tagged with
//! our reference in `metadata[reference]` and sent with that reference as
//! the `Idempotency-Key`.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay protection
//! - Secrets handled via `secrecy::SecretString`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use super::common::{
    constant_time_eq, flatten_metadata, http_client, parse_payload, read_json, required_str,
    split_token,
};
use crate::config::StripeConfig;
use crate::domain::foundation::Currency;
use crate::domain::payments::{
    CanonicalEvent, CanonicalEventType, CanonicalStatus, ProviderKind, PAYMENT_METHOD_TOKEN_KEY,
};
use crate::ports::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PayoutRequest, PayoutResult,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

const PROVIDER: &str = "stripe";

/// Parsed `Stripe-Signature` header: `t=<ts>,v1=<hex>[,v1=<hex>][,v0=<hex>]`.
#[derive(Debug, Clone)]
struct SignatureHeader {
    timestamp: i64,
    v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Result<Self, GatewayError> {
        let mut timestamp = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| GatewayError::InvalidSignature)?)
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| GatewayError::InvalidSignature)?)
                }
                _ => {}
            }
        }

        match timestamp {
            Some(timestamp) if !v1_signatures.is_empty() => Ok(Self {
                timestamp,
                v1_signatures,
            }),
            _ => Err(GatewayError::InvalidSignature),
        }
    }
}

pub struct StripeGateway {
    secret_key: SecretString,
    webhook_secret: SecretString,
    api_base: String,
    http: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            secret_key: SecretString::new(config.secret_key.clone()),
            webhook_secret: SecretString::new(config.webhook_secret.clone()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http: http_client(timeout)?,
        })
    }

    fn verify_at(&self, payload: &[u8], signature: &str, now: i64) -> Result<(), GatewayError> {
        let header = SignatureHeader::parse(signature)?;

        let age = now - header.timestamp;
        if age > MAX_TIMESTAMP_AGE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                age_secs = age,
                "stripe webhook too old, possible replay"
            );
            return Err(GatewayError::InvalidSignature);
        }
        if age < -MAX_FUTURE_TOLERANCE_SECS {
            tracing::warn!(event_timestamp = header.timestamp, "stripe webhook from the future");
            return Err(GatewayError::InvalidSignature);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.expose_secret().as_bytes())
            .map_err(|_| GatewayError::NotConfigured)?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        if header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_eq(expected.as_slice(), candidate))
        {
            Ok(())
        } else {
            tracing::warn!("invalid stripe webhook signature");
            Err(GatewayError::InvalidSignature)
        }
    }

    /// Finds the PaymentIntent tagged with our reference.
    async fn find_intent(&self, reference: &str) -> Result<Option<StripeIntent>, GatewayError> {
        let query = format!("metadata['reference']:'{}'", reference.replace('\'', ""));
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/search", self.api_base))
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .query(&[("query", query.as_str()), ("limit", "1")])
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let page: SearchPage = read_json(PROVIDER, response).await?;
        Ok(page.data.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    data: Vec<StripeIntent>,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeTransfer {
    id: String,
}

/// Maps a PaymentIntent status onto the canonical enum.
///
/// Off-session intents that need customer action cannot complete, so they
/// count as failures.
fn intent_status(status: &str) -> CanonicalStatus {
    match status {
        "succeeded" => CanonicalStatus::Success,
        "requires_payment_method" | "requires_action" | "canceled" => CanonicalStatus::Failed,
        _ => CanonicalStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn signature_header(&self) -> &'static str {
        "Stripe-Signature"
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        self.verify_at(payload, signature, chrono::Utc::now().timestamp())
    }

    fn normalize(&self, payload: &[u8]) -> Result<Option<CanonicalEvent>, GatewayError> {
        let value = parse_payload(payload)?;
        let event = required_str(&value, "/type")?.to_string();
        let object = value
            .pointer("/data/object")
            .ok_or_else(|| GatewayError::MalformedPayload("missing data.object".to_string()))?;

        let (event_type, status, amount_field) = match event.as_str() {
            "payment_intent.succeeded" => {
                (CanonicalEventType::Payment, CanonicalStatus::Success, "amount_received")
            }
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                (CanonicalEventType::Payment, CanonicalStatus::Failed, "amount")
            }
            "payment_intent.processing" => {
                (CanonicalEventType::Payment, CanonicalStatus::Pending, "amount")
            }
            "invoice.paid" | "invoice.payment_succeeded" => {
                (CanonicalEventType::Subscription, CanonicalStatus::Success, "amount_paid")
            }
            "invoice.payment_failed" => {
                (CanonicalEventType::Subscription, CanonicalStatus::Failed, "amount_due")
            }
            other => {
                tracing::debug!(event = %other, "ignoring stripe event type");
                return Ok(None);
            }
        };

        let mut metadata = flatten_metadata(object.get("metadata"));
        let object_id = required_str(object, "/id")?.to_string();
        let reference = metadata
            .get("reference")
            .cloned()
            .unwrap_or_else(|| object_id.clone());
        metadata.insert("provider_object_id".to_string(), object_id);

        if status == CanonicalStatus::Success {
            let customer = object.get("customer").and_then(Value::as_str);
            let method = object.get("payment_method").and_then(Value::as_str);
            if let Some(method) = method {
                let token = match customer {
                    Some(customer) => format!("{}:{}", customer, method),
                    None => method.to_string(),
                };
                metadata.insert(PAYMENT_METHOD_TOKEN_KEY.to_string(), token);
            }
        }
        if let Some(reason) = object
            .pointer("/last_payment_error/message")
            .and_then(Value::as_str)
        {
            metadata.insert("failure_reason".to_string(), reason.to_string());
        }

        let amount = object
            .get(amount_field)
            .or_else(|| object.get("amount"))
            .and_then(Value::as_i64)
            .ok_or_else(|| GatewayError::MalformedPayload("missing amount".to_string()))?;
        let currency = Currency::new(required_str(object, "/currency")?)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        Ok(Some(CanonicalEvent {
            provider: ProviderKind::Stripe,
            event_type,
            event,
            provider_event_id: value.get("id").and_then(Value::as_str).map(str::to_string),
            reference,
            status,
            amount,
            currency,
            metadata,
        }))
    }

    async fn verify_payment(&self, reference: &str) -> Result<CanonicalStatus, GatewayError> {
        match self.find_intent(reference).await? {
            Some(intent) => Ok(intent_status(&intent.status)),
            None => Ok(CanonicalStatus::Pending),
        }
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError> {
        let (customer, method) = match split_token(&request.payment_method_token) {
            (customer, Some(method)) => (Some(customer), method),
            (method, None) => (None, method),
        };

        let amount = request.amount.to_string();
        let currency = request.currency.as_str().to_ascii_lowercase();
        let mut params: Vec<(String, String)> = vec![
            ("amount".into(), amount),
            ("currency".into(), currency),
            ("payment_method".into(), method.to_string()),
            ("confirm".into(), "true".into()),
            ("off_session".into(), "true".into()),
            ("metadata[reference]".into(), request.reference.clone()),
            ("metadata[payer_id]".into(), request.payer_id.to_string()),
        ];
        if let Some(customer) = customer {
            params.push(("customer".into(), customer.to_string()));
        }
        for (key, value) in &request.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", &request.reference)
            .form(&params)
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let intent: StripeIntent = read_json(PROVIDER, response).await?;
        Ok(ChargeResult {
            status: intent_status(&intent.status),
            provider_reference: Some(intent.id),
        })
    }

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutResult, GatewayError> {
        let params = [
            ("amount", request.amount.to_string()),
            ("currency", request.currency.as_str().to_ascii_lowercase()),
            ("destination", request.destination.clone()),
            ("transfer_group", request.reference.clone()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/transfers", self.api_base))
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", &request.reference)
            .form(&params)
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let transfer: StripeTransfer = read_json(PROVIDER, response).await?;
        Ok(PayoutResult {
            success: true,
            provider_reference: transfer.id,
            status: CanonicalStatus::Success,
        })
    }

    /// Cancels an in-flight PaymentIntent for the reference, if any.
    async fn cancel_subscription(&self, reference: &str) -> Result<(), GatewayError> {
        let Some(intent) = self.find_intent(reference).await? else {
            return Ok(());
        };
        if intent_status(&intent.status) != CanonicalStatus::Pending {
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents/{}/cancel", self.api_base, intent.id))
            .basic_auth(self.secret_key.expose_secret(), Option::<&str>::None)
            .form(&[("cancellation_reason", "abandoned")])
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let _: BTreeMap<String, Value> = read_json(PROVIDER, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn gateway() -> StripeGateway {
        let config = StripeConfig {
            secret_key: "sk_test_key".to_string(),
            webhook_secret: SECRET.to_string(),
            api_base: "http://localhost:12111".to_string(),
        };
        StripeGateway::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn intent_event(event_type: &str) -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": event_type,
            "data": {"object": {
                "id": "pi_123",
                "amount": 5000,
                "amount_received": 5000,
                "currency": "usd",
                "customer": "cus_9",
                "payment_method": "pm_7",
                "metadata": {"reference": "ref-1", "tier": "gold"}
            }}
        })
        .to_string()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Signature Verification Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn verify_signature_accepts_valid_signature() {
        let payload = intent_event("payment_intent.succeeded");
        let now = 1_700_000_000;
        let header = sign(SECRET, now, &payload);
        assert!(gateway().verify_at(payload.as_bytes(), &header, now).is_ok());
    }

    #[test]
    fn verify_signature_rejects_wrong_secret() {
        let payload = intent_event("payment_intent.succeeded");
        let now = 1_700_000_000;
        let header = sign("wrong_secret", now, &payload);
        assert!(matches!(
            gateway().verify_at(payload.as_bytes(), &header, now),
            Err(GatewayError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_tampered_payload() {
        let payload = intent_event("payment_intent.succeeded");
        let now = 1_700_000_000;
        let header = sign(SECRET, now, &payload);
        let tampered = payload.replace("5000", "9000");
        assert!(gateway().verify_at(tampered.as_bytes(), &header, now).is_err());
    }

    #[test]
    fn verify_signature_rejects_stale_and_future_timestamps() {
        let payload = "{}";
        let now = 1_700_000_000;
        let stale = sign(SECRET, now - MAX_TIMESTAMP_AGE_SECS - 1, payload);
        let future = sign(SECRET, now + MAX_FUTURE_TOLERANCE_SECS + 1, payload);
        assert!(gateway().verify_at(payload.as_bytes(), &stale, now).is_err());
        assert!(gateway().verify_at(payload.as_bytes(), &future, now).is_err());
    }

    #[test]
    fn verify_signature_accepts_any_matching_v1() {
        let payload = "{}";
        let now = 1_700_000_000;
        let good = sign(SECRET, now, payload);
        let header = format!("{},v1={}", good.replacen("v1=", "v1=00ff,v1=", 1), "abcd");
        assert!(gateway().verify_at(payload.as_bytes(), &header, now).is_ok());
    }

    #[test]
    fn signature_header_requires_timestamp_and_v1() {
        assert!(SignatureHeader::parse("v1=abcd").is_err());
        assert!(SignatureHeader::parse("t=123").is_err());
        assert!(SignatureHeader::parse("t=abc,v1=abcd").is_err());
        assert!(SignatureHeader::parse("t=123,v1=zz").is_err());
        assert!(SignatureHeader::parse("").is_err());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Normalization Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn normalize_succeeded_intent() {
        let payload = intent_event("payment_intent.succeeded");
        let event = gateway().normalize(payload.as_bytes()).unwrap().unwrap();

        assert_eq!(event.provider, ProviderKind::Stripe);
        assert_eq!(event.event_type, CanonicalEventType::Payment);
        assert_eq!(event.reference, "ref-1");
        assert_eq!(event.status, CanonicalStatus::Success);
        assert_eq!(event.amount, 5000);
        assert_eq!(event.currency.as_str(), "USD");
        assert_eq!(event.provider_event_id.as_deref(), Some("evt_1"));
        assert_eq!(event.metadata_value(PAYMENT_METHOD_TOKEN_KEY), Some("cus_9:pm_7"));
        assert_eq!(event.metadata_value("tier"), Some("gold"));
    }

    #[test]
    fn normalize_failed_invoice_is_subscription_event() {
        let payload = serde_json::json!({
            "id": "evt_2",
            "type": "invoice.payment_failed",
            "data": {"object": {
                "id": "in_1", "amount_due": 1200, "currency": "eur",
                "metadata": {"reference": "ren-1"}
            }}
        })
        .to_string();
        let event = gateway().normalize(payload.as_bytes()).unwrap().unwrap();
        assert_eq!(event.event_type, CanonicalEventType::Subscription);
        assert_eq!(event.status, CanonicalStatus::Failed);
        assert_eq!(event.amount, 1200);
        assert!(event.metadata_value(PAYMENT_METHOD_TOKEN_KEY).is_none());
    }

    #[test]
    fn normalize_falls_back_to_object_id_without_reference() {
        let payload = serde_json::json!({
            "id": "evt_3",
            "type": "payment_intent.payment_failed",
            "data": {"object": {"id": "pi_9", "amount": 100, "currency": "gbp"}}
        })
        .to_string();
        let event = gateway().normalize(payload.as_bytes()).unwrap().unwrap();
        assert_eq!(event.reference, "pi_9");
    }

    #[test]
    fn normalize_ignores_unrelated_events() {
        let payload = r#"{"id":"evt_4","type":"customer.created","data":{"object":{}}}"#;
        assert!(gateway().normalize(payload.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn normalize_rejects_malformed_json() {
        assert!(matches!(
            gateway().normalize(b"not json"),
            Err(GatewayError::MalformedPayload(_))
        ));
    }

    #[test]
    fn intent_status_treats_action_required_as_failed() {
        assert_eq!(intent_status("succeeded"), CanonicalStatus::Success);
        assert_eq!(intent_status("requires_action"), CanonicalStatus::Failed);
        assert_eq!(intent_status("processing"), CanonicalStatus::Pending);
    }
}
