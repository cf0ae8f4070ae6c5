//! HTTP handler for provider webhook deliveries.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Json, Path, Query, State};
use axum::http::HeaderMap;
use serde::Serialize;

use crate::adapters::http::{ApiError, BillingAppState};
use crate::domain::payments::{BillingError, ProviderKind};

/// Acknowledgement body; any 2xx stops provider redelivery.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// POST /webhooks/:provider
///
/// Returns 2xx for applied, duplicate, and ignored deliveries. Verification
/// failures are 4xx (final); storage and provider outages are 5xx so the
/// provider redelivers.
pub async fn receive_webhook(
    State(state): State<BillingAppState>,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let provider: ProviderKind = provider
        .parse()
        .map_err(|_| BillingError::UnknownProvider(provider.clone()))?;

    let header = state.router.signature_header(provider)?;
    let signature = headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| callback_token(provider, &query));

    let event = match state
        .router
        .process_webhook(provider, &body, signature.as_deref())
    {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::debug!(%provider, "webhook carries no payment outcome");
            return Ok(Json(WebhookAck { received: true }));
        }
        Err(err) => {
            tracing::warn!(%provider, error = %err, "webhook rejected");
            return Err(err.into());
        }
    };

    let outcome = state.processor.process(&event).await?;
    tracing::info!(
        %provider,
        reference = %event.reference,
        status = %event.status,
        %outcome,
        "webhook processed"
    );

    Ok(Json(WebhookAck { received: true }))
}

/// M-Pesa callbacks cannot carry custom headers; the token rides in the
/// registered callback URL instead.
fn callback_token(provider: ProviderKind, query: &HashMap<String, String>) -> Option<String> {
    match provider {
        ProviderKind::Mpesa => query.get("token").cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_mpesa_reads_the_query_token() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "abc".to_string());

        assert_eq!(callback_token(ProviderKind::Mpesa, &query), Some("abc".to_string()));
        assert_eq!(callback_token(ProviderKind::Paystack, &query), None);
    }
}
