//! M-Pesa adapter (Daraja API, mobile-wallet rail, KES only).
//!
//! There is no stored card: every charge is an STK push to the payer's
//! phone, confirmed later by callback. Charges therefore always come back
//! pending, keyed by the `CheckoutRequestID` the callback will carry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::common::{
    constant_time_eq, http_client, parse_payload, read_json, required_str, scalar_to_string,
};
use crate::config::MpesaConfig;
use crate::domain::foundation::Currency;
use crate::domain::payments::{
    CanonicalEvent, CanonicalEventType, CanonicalStatus, ProviderKind, PAYMENT_METHOD_TOKEN_KEY,
};
use crate::ports::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PayoutRequest, PayoutResult,
};

const PROVIDER: &str = "mpesa";

/// Daraja timestamps are East Africa Time.
const EAT_OFFSET_SECS: i64 = 3 * 3600;

/// Refresh the OAuth token this long before Daraja expires it.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// STK query error code while the customer has not yet responded.
const STILL_PROCESSING: &str = "500.001.1001";

pub struct MpesaGateway {
    consumer_key: SecretString,
    consumer_secret: SecretString,
    shortcode: String,
    passkey: SecretString,
    callback_url: String,
    callback_token: SecretString,
    initiator_name: String,
    security_credential: SecretString,
    api_base: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct B2cResponse {
    #[serde(rename = "ConversationID")]
    conversation_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
}

impl MpesaGateway {
    pub fn new(config: &MpesaConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            consumer_key: SecretString::new(config.consumer_key.clone()),
            consumer_secret: SecretString::new(config.consumer_secret.clone()),
            shortcode: config.shortcode.clone(),
            passkey: SecretString::new(config.passkey.clone()),
            callback_url: config.callback_url.clone(),
            callback_token: SecretString::new(config.callback_token.clone()),
            initiator_name: config.initiator_name.clone(),
            security_credential: SecretString::new(config.security_credential.clone()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http: http_client(timeout)?,
            token: Mutex::new(None),
        })
    }

    /// Returns a cached OAuth token, refreshing it when close to expiry.
    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .get(format!("{}/oauth/v1/generate", self.api_base))
            .basic_auth(
                self.consumer_key.expose_secret(),
                Some(self.consumer_secret.expose_secret()),
            )
            .query(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(GatewayError::from_http)?;
        let token: TokenResponse = read_json(PROVIDER, response).await?;

        let lifetime = scalar_to_string(&token.expires_in)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3599);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(token.access_token)
    }

    /// `(password, timestamp)` for STK requests.
    fn stk_password(&self) -> (String, String) {
        let timestamp = (Utc::now() + chrono::Duration::seconds(EAT_OFFSET_SECS))
            .format("%Y%m%d%H%M%S")
            .to_string();
        (stk_password(&self.shortcode, self.passkey.expose_secret(), &timestamp), timestamp)
    }

    /// Callback URL carrying the shared token Daraja will echo back.
    ///
    /// STK and B2C results share the URL; `normalize` tells them apart.
    fn callback_with_token(&self) -> String {
        let separator = if self.callback_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}token={}",
            self.callback_url,
            separator,
            self.callback_token.expose_secret()
        )
    }
}

fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Daraja only accepts whole shillings.
fn whole_shillings(amount: i64, currency: &Currency) -> Result<i64, GatewayError> {
    if currency.as_str() != "KES" {
        return Err(GatewayError::Unsupported(format!(
            "mpesa cannot move {}",
            currency
        )));
    }
    if amount % 100 != 0 {
        return Err(GatewayError::Unsupported(
            "mpesa amounts must be whole shillings".to_string(),
        ));
    }
    Ok(amount / 100)
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mpesa
    }

    fn signature_header(&self) -> &'static str {
        "X-Callback-Token"
    }

    fn verify_signature(&self, _payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        let expected = self.callback_token.expose_secret().as_bytes();
        if constant_time_eq(expected, signature.trim().as_bytes()) {
            Ok(())
        } else {
            tracing::warn!("invalid mpesa callback token");
            Err(GatewayError::InvalidSignature)
        }
    }

    fn normalize(&self, payload: &[u8]) -> Result<Option<CanonicalEvent>, GatewayError> {
        let value = parse_payload(payload)?;
        let Some(callback) = value.pointer("/Body/stkCallback") else {
            // B2C results and other callback shapes carry no payment outcome.
            tracing::debug!("ignoring non-STK mpesa callback");
            return Ok(None);
        };

        let reference = required_str(callback, "/CheckoutRequestID")?.to_string();
        let result_code = callback
            .get("ResultCode")
            .and_then(scalar_to_string)
            .ok_or_else(|| GatewayError::MalformedPayload("missing ResultCode".to_string()))?;
        let status = if result_code == "0" {
            CanonicalStatus::Success
        } else {
            CanonicalStatus::Failed
        };

        let currency = ProviderKind::Mpesa.native_currency();
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("result_code".to_string(), result_code);
        if let Some(desc) = callback.get("ResultDesc").and_then(Value::as_str) {
            metadata.insert("result_desc".to_string(), desc.to_string());
        }
        if let Some(id) = callback.get("MerchantRequestID").and_then(Value::as_str) {
            metadata.insert("merchant_request_id".to_string(), id.to_string());
        }

        let mut amount = 0;
        let items = callback
            .pointer("/CallbackMetadata/Item")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for item in &items {
            let Some(name) = item.get("Name").and_then(Value::as_str) else {
                continue;
            };
            let Some(raw) = item.get("Value").and_then(scalar_to_string) else {
                continue;
            };
            match name {
                "Amount" => {
                    amount = currency
                        .parse_major_amount(&raw)
                        .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
                }
                "MpesaReceiptNumber" => {
                    metadata.insert("receipt_number".to_string(), raw);
                }
                "PhoneNumber" => {
                    metadata.insert(PAYMENT_METHOD_TOKEN_KEY.to_string(), raw);
                }
                _ => {}
            }
        }

        if status == CanonicalStatus::Success && amount == 0 {
            return Err(GatewayError::MalformedPayload(
                "successful callback without amount".to_string(),
            ));
        }

        Ok(Some(CanonicalEvent {
            provider: ProviderKind::Mpesa,
            event_type: CanonicalEventType::Payment,
            event: "stk.callback".to_string(),
            provider_event_id: metadata.get("merchant_request_id").cloned(),
            reference,
            status,
            amount,
            currency,
            metadata,
        }))
    }

    /// `reference` is the `CheckoutRequestID`.
    async fn verify_payment(&self, reference: &str) -> Result<CanonicalStatus, GatewayError> {
        let token = self.access_token().await?;
        let (password, timestamp) = self.stk_password();
        let body = json!({
            "BusinessShortCode": self.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "CheckoutRequestID": reference,
        });

        let response = self
            .http
            .post(format!("{}/mpesa/stkpushquery/v1/query", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from_http)?;

        // Daraja answers "still processing" with a 500 status and an error code.
        let status = response.status();
        let value: Value = response.json().await.map_err(GatewayError::from_http)?;
        if value.get("errorCode").and_then(Value::as_str) == Some(STILL_PROCESSING) {
            return Ok(CanonicalStatus::Pending);
        }
        if !status.is_success() {
            return Err(GatewayError::Transient(format!("mpesa returned {}", status)));
        }

        match value.get("ResultCode").and_then(scalar_to_string).as_deref() {
            Some("0") => Ok(CanonicalStatus::Success),
            Some(_) => Ok(CanonicalStatus::Failed),
            None => Ok(CanonicalStatus::Pending),
        }
    }

    /// STK push to the stored phone number; the outcome arrives by callback.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError> {
        let amount = whole_shillings(request.amount, &request.currency)?;
        let token = self.access_token().await?;
        let (password, timestamp) = self.stk_password();
        let account_reference: String = request.reference.chars().take(12).collect();

        let body = json!({
            "BusinessShortCode": self.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": request.payment_method_token,
            "PartyB": self.shortcode,
            "PhoneNumber": request.payment_method_token,
            "CallBackURL": self.callback_with_token(),
            "AccountReference": account_reference,
            "TransactionDesc": "subscription renewal",
        });

        let response = self
            .http
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from_http)?;
        let push: StkPushResponse = read_json(PROVIDER, response).await?;

        match (push.response_code.as_deref(), push.checkout_request_id) {
            (Some("0"), Some(checkout_id)) => Ok(ChargeResult {
                status: CanonicalStatus::Pending,
                provider_reference: Some(checkout_id),
            }),
            _ => Err(GatewayError::Declined(
                push.response_description
                    .unwrap_or_else(|| "stk push rejected".to_string()),
            )),
        }
    }

    /// B2C payment to the creator's phone number.
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutResult, GatewayError> {
        let amount = whole_shillings(request.amount, &request.currency)?;
        let token = self.access_token().await?;

        let body = json!({
            "InitiatorName": self.initiator_name,
            "SecurityCredential": self.security_credential.expose_secret(),
            "CommandID": "BusinessPayment",
            "Amount": amount,
            "PartyA": self.shortcode,
            "PartyB": request.destination,
            "Remarks": "creator payout",
            "QueueTimeOutURL": self.callback_with_token(),
            "ResultURL": self.callback_with_token(),
            "Occasion": request.reference,
        });

        let response = self
            .http
            .post(format!("{}/mpesa/b2c/v1/paymentrequest", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from_http)?;
        let result: B2cResponse = read_json(PROVIDER, response).await?;

        match (result.response_code.as_deref(), result.conversation_id) {
            (Some("0"), Some(conversation_id)) => Ok(PayoutResult {
                success: true,
                provider_reference: conversation_id,
                status: CanonicalStatus::Pending,
            }),
            _ => Err(GatewayError::Declined(
                result
                    .response_description
                    .unwrap_or_else(|| "b2c request rejected".to_string()),
            )),
        }
    }

    /// Nothing recurs on the provider side.
    async fn cancel_subscription(&self, _reference: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}
