//! Paystack adapter (mobile-money and card aggregator).
//!
//! Webhooks are signed with HMAC-SHA512 of the raw body keyed by the
//! secret key. Renewals charge the reusable authorization captured from
//! the first successful transaction.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha512;

use super::common::{
    constant_time_eq, flatten_metadata, http_client, parse_payload, read_json, required_str,
    scalar_to_string, split_token,
};
use crate::config::PaystackConfig;
use crate::domain::foundation::Currency;
use crate::domain::payments::{
    CanonicalEvent, CanonicalEventType, CanonicalStatus, ProviderKind, PAYMENT_METHOD_TOKEN_KEY,
};
use crate::ports::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PayoutRequest, PayoutResult,
};

type HmacSha512 = Hmac<Sha512>;

const PROVIDER: &str = "paystack";

pub struct PaystackGateway {
    secret_key: SecretString,
    api_base: String,
    http: reqwest::Client,
}

/// Paystack wraps every response as `{status, message, data}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, GatewayError> {
        match (self.status, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(GatewayError::Declined(self.message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: Value,
    status: String,
    #[serde(default)]
    authorization: Option<Authorization>,
}

#[derive(Debug, Deserialize)]
struct Authorization {
    authorization_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transfer {
    transfer_code: String,
    status: String,
}

impl PaystackGateway {
    pub fn new(config: &PaystackConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            secret_key: SecretString::new(config.secret_key.clone()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http: http_client(timeout)?,
        })
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let mut mac = HmacSha512::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|_| GatewayError::NotConfigured)?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    async fn fetch_transaction(&self, reference: &str) -> Result<Transaction, GatewayError> {
        let response = self
            .http
            .get(format!("{}/transaction/verify/{}", self.api_base, reference))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(GatewayError::from_http)?;
        read_json::<Envelope<Transaction>>(PROVIDER, response)
            .await?
            .into_data()
    }
}

/// Paystack's transfer statuses include OTP and queue states.
fn transfer_status(status: &str) -> CanonicalStatus {
    match status {
        "success" => CanonicalStatus::Success,
        "failed" | "reversed" | "abandoned" | "rejected" => CanonicalStatus::Failed,
        _ => CanonicalStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paystack
    }

    fn signature_header(&self) -> &'static str {
        "x-paystack-signature"
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        let provided = hex::decode(signature.trim()).map_err(|_| GatewayError::InvalidSignature)?;
        let expected = self.sign(payload)?;
        if constant_time_eq(&expected, &provided) {
            Ok(())
        } else {
            tracing::warn!("invalid paystack webhook signature");
            Err(GatewayError::InvalidSignature)
        }
    }

    fn normalize(&self, payload: &[u8]) -> Result<Option<CanonicalEvent>, GatewayError> {
        let value = parse_payload(payload)?;
        let event = required_str(&value, "/event")?.to_string();

        let event_type = match event.split('.').next() {
            Some("charge") => CanonicalEventType::Payment,
            Some("invoice") => CanonicalEventType::Subscription,
            _ => {
                tracing::debug!(event = %event, "ignoring paystack event type");
                return Ok(None);
            }
        };

        let data = value
            .get("data")
            .ok_or_else(|| GatewayError::MalformedPayload("missing data".to_string()))?;

        // Invoice events nest the charge under `transaction`.
        let charge = match event_type {
            CanonicalEventType::Subscription => data.get("transaction").unwrap_or(data),
            CanonicalEventType::Payment => data,
        };

        let reference = required_str(charge, "/reference")?.to_string();
        let status = match charge.get("status").and_then(Value::as_str) {
            Some(raw) => CanonicalStatus::from_provider_status(raw),
            None if event.ends_with(".success") => CanonicalStatus::Success,
            None if event.ends_with(".failed") => CanonicalStatus::Failed,
            None => CanonicalStatus::Pending,
        };
        let amount = charge
            .get("amount")
            .or_else(|| data.get("amount"))
            .and_then(Value::as_i64)
            .ok_or_else(|| GatewayError::MalformedPayload("missing amount".to_string()))?;
        let currency = charge
            .get("currency")
            .or_else(|| data.get("currency"))
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MalformedPayload("missing currency".to_string()))?;
        let currency =
            Currency::new(currency).map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        let mut metadata = flatten_metadata(data.get("metadata"));
        if let Some(id) = charge.get("id").and_then(scalar_to_string) {
            metadata.insert("provider_object_id".to_string(), id);
        }
        if let Some(reason) = charge.get("gateway_response").and_then(Value::as_str) {
            metadata.insert("gateway_response".to_string(), reason.to_string());
        }
        if status == CanonicalStatus::Success {
            let code = data
                .pointer("/authorization/authorization_code")
                .and_then(Value::as_str);
            let email = data.pointer("/customer/email").and_then(Value::as_str);
            let reusable = data
                .pointer("/authorization/reusable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if let (Some(code), Some(email), true) = (code, email, reusable) {
                metadata.insert(
                    PAYMENT_METHOD_TOKEN_KEY.to_string(),
                    format!("{}:{}", code, email),
                );
            }
        }

        Ok(Some(CanonicalEvent {
            provider: ProviderKind::Paystack,
            event_type,
            event,
            provider_event_id: None,
            reference,
            status,
            amount,
            currency,
            metadata,
        }))
    }

    async fn verify_payment(&self, reference: &str) -> Result<CanonicalStatus, GatewayError> {
        let transaction = self.fetch_transaction(reference).await?;
        Ok(CanonicalStatus::from_provider_status(&transaction.status))
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError> {
        let (authorization_code, email) = match split_token(&request.payment_method_token) {
            (code, Some(email)) => (code, email),
            _ => {
                return Err(GatewayError::Unsupported(
                    "paystack token must carry an email".to_string(),
                ))
            }
        };

        let body = json!({
            "authorization_code": authorization_code,
            "email": email,
            "amount": request.amount,
            "currency": request.currency.as_str(),
            "reference": request.reference,
            "metadata": request.metadata,
        });

        let response = self
            .http
            .post(format!("{}/transaction/charge_authorization", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let transaction = read_json::<Envelope<Transaction>>(PROVIDER, response)
            .await?
            .into_data()?;
        Ok(ChargeResult {
            status: CanonicalStatus::from_provider_status(&transaction.status),
            provider_reference: scalar_to_string(&transaction.id),
        })
    }

    /// `destination` is a Paystack transfer recipient code.
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutResult, GatewayError> {
        let body = json!({
            "source": "balance",
            "amount": request.amount,
            "currency": request.currency.as_str(),
            "recipient": request.destination,
            "reference": request.reference,
            "reason": "creator payout",
        });

        let response = self
            .http
            .post(format!("{}/transfer", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let transfer = read_json::<Envelope<Transfer>>(PROVIDER, response)
            .await?
            .into_data()?;
        let status = transfer_status(&transfer.status);
        Ok(PayoutResult {
            success: status != CanonicalStatus::Failed,
            provider_reference: transfer.transfer_code,
            status,
        })
    }

    /// Deactivates the stored authorization so no further charges succeed.
    async fn cancel_subscription(&self, reference: &str) -> Result<(), GatewayError> {
        let transaction = self.fetch_transaction(reference).await?;
        let Some(code) = transaction
            .authorization
            .and_then(|a| a.authorization_code)
        else {
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/customer/deactivate_authorization", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .json(&json!({ "authorization_code": code }))
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        let envelope: Envelope<Value> = read_json(PROVIDER, response).await?;
        if envelope.status {
            Ok(())
        } else {
            Err(GatewayError::Declined(envelope.message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PaystackGateway {
        let config = PaystackConfig {
            secret_key: "sk_test_paystack".to_string(),
            api_base: "http://localhost:12112".to_string(),
        };
        PaystackGateway::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn charge_success() -> String {
        json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "ref-1",
                "status": "success",
                "amount": 500000,
                "currency": "NGN",
                "gateway_response": "Approved",
                "metadata": {"tier": "gold"},
                "customer": {"email": "fan@example.com"},
                "authorization": {"authorization_code": "AUTH_abc", "reusable": true}
            }
        })
        .to_string()
    }

    #[test]
    fn verify_signature_accepts_hmac_sha512_of_body() {
        let gateway = gateway();
        let payload = charge_success();
        let signature = hex::encode(gateway.sign(payload.as_bytes()).unwrap());
        assert!(gateway.verify_signature(payload.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn verify_signature_rejects_mismatch_and_garbage() {
        let gateway = gateway();
        let payload = charge_success();
        let signature = hex::encode(gateway.sign(b"other body").unwrap());
        assert!(gateway.verify_signature(payload.as_bytes(), &signature).is_err());
        assert!(gateway.verify_signature(payload.as_bytes(), "not-hex").is_err());
        assert!(gateway.verify_signature(payload.as_bytes(), "").is_err());
    }

    #[test]
    fn normalize_charge_success_captures_reusable_authorization() {
        let event = gateway().normalize(charge_success().as_bytes()).unwrap().unwrap();
        assert_eq!(event.provider, ProviderKind::Paystack);
        assert_eq!(event.event_type, CanonicalEventType::Payment);
        assert_eq!(event.reference, "ref-1");
        assert_eq!(event.status, CanonicalStatus::Success);
        assert_eq!(event.amount, 500000);
        assert_eq!(event.currency.as_str(), "NGN");
        assert_eq!(
            event.metadata_value(PAYMENT_METHOD_TOKEN_KEY),
            Some("AUTH_abc:fan@example.com")
        );
        assert_eq!(event.metadata_value("provider_object_id"), Some("302961"));
        assert_eq!(event.metadata_value("tier"), Some("gold"));
    }

    #[test]
    fn normalize_failed_charge_without_status_uses_event_suffix() {
        let payload = json!({
            "event": "charge.failed",
            "data": {"reference": "ref-2", "amount": 1000, "currency": "GHS", "metadata": ""}
        })
        .to_string();
        let event = gateway().normalize(payload.as_bytes()).unwrap().unwrap();
        assert_eq!(event.status, CanonicalStatus::Failed);
        assert!(event.metadata_value(PAYMENT_METHOD_TOKEN_KEY).is_none());
    }

    #[test]
    fn normalize_invoice_reads_nested_transaction() {
        let payload = json!({
            "event": "invoice.payment_failed",
            "data": {
                "amount": 250000,
                "transaction": {"reference": "ren-7", "status": "failed", "currency": "NGN"}
            }
        })
        .to_string();
        let event = gateway().normalize(payload.as_bytes()).unwrap().unwrap();
        assert_eq!(event.event_type, CanonicalEventType::Subscription);
        assert_eq!(event.reference, "ren-7");
        assert_eq!(event.amount, 250000);
        assert_eq!(event.status, CanonicalStatus::Failed);
    }

    #[test]
    fn normalize_ignores_transfer_events() {
        let payload = r#"{"event":"transfer.success","data":{"reference":"p-1"}}"#;
        assert!(gateway().normalize(payload.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn normalize_requires_reference() {
        let payload = r#"{"event":"charge.success","data":{"amount":1,"currency":"NGN"}}"#;
        assert!(matches!(
            gateway().normalize(payload.as_bytes()),
            Err(GatewayError::MalformedPayload(_))
        ));
    }

    #[test]
    fn transfer_status_maps_otp_to_pending() {
        assert_eq!(transfer_status("otp"), CanonicalStatus::Pending);
        assert_eq!(transfer_status("success"), CanonicalStatus::Success);
        assert_eq!(transfer_status("reversed"), CanonicalStatus::Failed);
    }
}
