//! Helpers shared by the provider adapters.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::ports::GatewayError;

/// Builds an HTTP client with the provider call timeout applied.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Transient(format!("http client: {}", e)))
}

/// Constant-time equality; differing lengths compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

/// Classifies a provider response and decodes its JSON body.
///
/// 5xx and 429 are transient; any other non-success status is a decline
/// carrying the provider's message.
pub async fn read_json<T: DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(GatewayError::from_http);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(provider, status = %status, "provider unavailable");
        return Err(GatewayError::Transient(format!("{} returned {}", provider, status)));
    }

    tracing::warn!(provider, status = %status, body = %body, "provider rejected request");
    Err(GatewayError::Declined(extract_message(&body).unwrap_or_else(|| status.to_string())))
}

/// Pulls a human-readable message out of a provider error body.
fn extract_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("errorMessage"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parses a webhook body as JSON.
pub fn parse_payload(payload: &[u8]) -> Result<Value, GatewayError> {
    serde_json::from_slice(payload).map_err(|e| {
        tracing::warn!(error = %e, "failed to parse webhook payload");
        GatewayError::MalformedPayload(format!("invalid JSON: {}", e))
    })
}

/// Reads a required string field at a JSON pointer.
pub fn required_str<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, GatewayError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| GatewayError::MalformedPayload(format!("missing {}", pointer)))
}

/// Renders a JSON scalar without quotes; numbers keep their literal form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flattens the scalar members of a JSON object into string metadata.
///
/// Providers send metadata as objects, JSON-encoded strings, or not at all.
pub fn flatten_metadata(value: Option<&Value>) -> BTreeMap<String, String> {
    let object = match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => return BTreeMap::new(),
        },
        _ => return BTreeMap::new(),
    };
    object
        .iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
        .collect()
}

/// Splits a composite payment-method token of the form `primary:secondary`.
pub fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once(':') {
        Some((primary, secondary)) if !secondary.is_empty() => (primary, Some(secondary)),
        _ => (token, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"abc", b"abd"));
    }

    #[test]
    fn flatten_metadata_accepts_objects_and_encoded_strings() {
        let object = json!({"tier": "gold", "months": 3, "nested": {"x": 1}});
        let flat = flatten_metadata(Some(&object));
        assert_eq!(flat.get("tier").map(String::as_str), Some("gold"));
        assert_eq!(flat.get("months").map(String::as_str), Some("3"));
        assert!(!flat.contains_key("nested"));

        let encoded = json!("{\"tier\":\"silver\"}");
        assert_eq!(
            flatten_metadata(Some(&encoded)).get("tier").map(String::as_str),
            Some("silver")
        );
        assert!(flatten_metadata(Some(&json!(""))).is_empty());
        assert!(flatten_metadata(None).is_empty());
    }

    #[test]
    fn split_token_handles_single_and_composite() {
        assert_eq!(split_token("cus_1:pm_2"), ("cus_1", Some("pm_2")));
        assert_eq!(split_token("pm_2"), ("pm_2", None));
        assert_eq!(split_token("AUTH_x:"), ("AUTH_x:", None));
    }

    #[test]
    fn required_str_rejects_blank() {
        let value = json!({"data": {"reference": " "}});
        assert!(required_str(&value, "/data/reference").is_err());
    }
}
