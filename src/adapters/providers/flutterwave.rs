//! Flutterwave adapter (pan-African mobile-money and card aggregator).
//!
//! Flutterwave echoes a shared secret in the `verif-hash` header instead of
//! signing the body, and reports amounts in major units.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use super::common::{
    constant_time_eq, flatten_metadata, http_client, parse_payload, read_json, required_str,
    scalar_to_string, split_token,
};
use crate::config::FlutterwaveConfig;
use crate::domain::foundation::{format_minor_amount, Currency};
use crate::domain::payments::{
    CanonicalEvent, CanonicalEventType, CanonicalStatus, ProviderKind, PAYMENT_METHOD_TOKEN_KEY,
};
use crate::ports::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PayoutRequest, PayoutResult,
};

const PROVIDER: &str = "flutterwave";

pub struct FlutterwaveGateway {
    secret_key: SecretString,
    webhook_hash: SecretString,
    api_base: String,
    http: reqwest::Client,
}

/// `{status: "success"|"error", message, data}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, GatewayError> {
        match (self.status.as_str(), self.data) {
            ("success", Some(data)) => Ok(data),
            _ => Err(GatewayError::Declined(self.message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: Value,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Transfer {
    id: Value,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PlanSubscription {
    id: Value,
    status: String,
}

impl FlutterwaveGateway {
    pub fn new(config: &FlutterwaveConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            secret_key: SecretString::new(config.secret_key.clone()),
            webhook_hash: SecretString::new(config.webhook_hash.clone()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http: http_client(timeout)?,
        })
    }

    async fn fetch_transaction(&self, reference: &str) -> Result<Transaction, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v3/transactions/verify_by_reference", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .query(&[("tx_ref", reference)])
            .send()
            .await
            .map_err(GatewayError::from_http)?;
        read_json::<Envelope<Transaction>>(PROVIDER, response)
            .await?
            .into_data()
    }
}

/// Reads a major-unit amount that may arrive as a JSON number or string.
fn major_amount(value: Option<&Value>, currency: &Currency) -> Result<i64, GatewayError> {
    let raw = value
        .and_then(scalar_to_string)
        .ok_or_else(|| GatewayError::MalformedPayload("missing amount".to_string()))?;
    currency
        .parse_major_amount(&raw)
        .map_err(|e| GatewayError::MalformedPayload(e.to_string()))
}

fn transfer_status(status: &str) -> CanonicalStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESSFUL" => CanonicalStatus::Success,
        "FAILED" => CanonicalStatus::Failed,
        _ => CanonicalStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Flutterwave
    }

    fn signature_header(&self) -> &'static str {
        "verif-hash"
    }

    fn verify_signature(&self, _payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        let expected = self.webhook_hash.expose_secret().as_bytes();
        if constant_time_eq(expected, signature.trim().as_bytes()) {
            Ok(())
        } else {
            tracing::warn!("invalid flutterwave verif-hash");
            Err(GatewayError::InvalidSignature)
        }
    }

    fn normalize(&self, payload: &[u8]) -> Result<Option<CanonicalEvent>, GatewayError> {
        let value = parse_payload(payload)?;
        let event = value
            .get("event")
            .or_else(|| value.get("event.type"))
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MalformedPayload("missing event".to_string()))?
            .to_string();

        if event != "charge.completed" {
            tracing::debug!(event = %event, "ignoring flutterwave event type");
            return Ok(None);
        }

        let data = value
            .get("data")
            .ok_or_else(|| GatewayError::MalformedPayload("missing data".to_string()))?;
        let reference = required_str(data, "/tx_ref")?.to_string();
        let status = CanonicalStatus::from_provider_status(required_str(data, "/status")?);
        let currency = Currency::new(required_str(data, "/currency")?)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        let amount = major_amount(data.get("amount"), &currency)?;

        let event_type = match data.get("payment_plan") {
            Some(plan) if !plan.is_null() => CanonicalEventType::Subscription,
            _ => CanonicalEventType::Payment,
        };

        let mut metadata = flatten_metadata(value.get("meta_data").or_else(|| data.get("meta")));
        if let Some(id) = data.get("id").and_then(scalar_to_string) {
            metadata.insert("provider_object_id".to_string(), id);
        }
        if let Some(flw_ref) = data.get("flw_ref").and_then(Value::as_str) {
            metadata.insert("flw_ref".to_string(), flw_ref.to_string());
        }
        if let Some(reason) = data.get("processor_response").and_then(Value::as_str) {
            metadata.insert("processor_response".to_string(), reason.to_string());
        }
        if status == CanonicalStatus::Success {
            let token = data.pointer("/card/token").and_then(Value::as_str);
            let email = data.pointer("/customer/email").and_then(Value::as_str);
            if let (Some(token), Some(email)) = (token, email) {
                metadata.insert(
                    PAYMENT_METHOD_TOKEN_KEY.to_string(),
                    format!("{}:{}", token, email),
                );
            }
        }

        Ok(Some(CanonicalEvent {
            provider: ProviderKind::Flutterwave,
            event_type,
            event,
            provider_event_id: data.get("id").and_then(scalar_to_string),
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
        let (token, email) = match split_token(&request.payment_method_token) {
            (token, Some(email)) => (token, email),
            _ => {
                return Err(GatewayError::Unsupported(
                    "flutterwave token must carry an email".to_string(),
                ))
            }
        };

        let body = json!({
            "token": token,
            "email": email,
            "currency": request.currency.as_str(),
            "amount": format_minor_amount(request.amount, &request.currency),
            "tx_ref": request.reference,
            "meta": request.metadata,
        });

        let response = self
            .http
            .post(format!("{}/v3/tokenized-charges", self.api_base))
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

    /// `destination` is `bank_code:account_number`; mobile-money uses the
    /// network code as bank code.
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutResult, GatewayError> {
        let (bank, account) = match split_token(&request.destination) {
            (bank, Some(account)) => (bank, account),
            _ => {
                return Err(GatewayError::Unsupported(
                    "flutterwave destination must be bank_code:account_number".to_string(),
                ))
            }
        };

        let body = json!({
            "account_bank": bank,
            "account_number": account,
            "amount": format_minor_amount(request.amount, &request.currency),
            "currency": request.currency.as_str(),
            "reference": request.reference,
            "narration": "creator payout",
        });

        let response = self
            .http
            .post(format!("{}/v3/transfers", self.api_base))
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
            provider_reference: scalar_to_string(&transfer.id).unwrap_or_default(),
            status,
        })
    }

    /// Cancels any payment-plan subscription created by the transaction.
    async fn cancel_subscription(&self, reference: &str) -> Result<(), GatewayError> {
        let transaction = self.fetch_transaction(reference).await?;
        let Some(transaction_id) = scalar_to_string(&transaction.id) else {
            return Ok(());
        };

        let response = self
            .http
            .get(format!("{}/v3/subscriptions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .query(&[("transaction_id", transaction_id.as_str())])
            .send()
            .await
            .map_err(GatewayError::from_http)?;
        let plans = read_json::<Envelope<Vec<PlanSubscription>>>(PROVIDER, response)
            .await?
            .into_data()?;

        for plan in plans.iter().filter(|p| p.status == "active") {
            let Some(id) = scalar_to_string(&plan.id) else {
                continue;
            };
            let response = self
                .http
                .put(format!("{}/v3/subscriptions/{}/cancel", self.api_base, id))
                .bearer_auth(self.secret_key.expose_secret())
                .send()
                .await
                .map_err(GatewayError::from_http)?;
            read_json::<Envelope<Value>>(PROVIDER, response)
                .await?
                .into_data()?;
        }
        Ok(())
    }
}
