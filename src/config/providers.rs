//! Payment provider credentials.
//!
//! A provider is enabled only when its section is present. Secrets are
//! wrapped in `SecretString` when adapters are built.

use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::payments::ProviderKind;

/// Card processor credentials
#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_stripe_base")]
    pub api_base: String,
}

/// Paystack signs webhooks with the secret key itself.
#[derive(Debug, Clone, Deserialize)]
pub struct PaystackConfig {
    pub secret_key: String,
    #[serde(default = "default_paystack_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Value Flutterwave echoes in the `verif-hash` header
    pub webhook_hash: String,
    #[serde(default = "default_flutterwave_base")]
    pub api_base: String,
}

/// Mobile-wallet rail (Daraja API)
#[derive(Debug, Clone, Deserialize)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    /// Shared token appended to callback URLs and echoed back in `X-Callback-Token`
    pub callback_token: String,
    pub initiator_name: String,
    pub security_credential: String,
    #[serde(default = "default_mpesa_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub stripe: Option<StripeConfig>,
    #[serde(default)]
    pub paystack: Option<PaystackConfig>,
    #[serde(default)]
    pub flutterwave: Option<FlutterwaveConfig>,
    #[serde(default)]
    pub mpesa: Option<MpesaConfig>,
}

impl ProvidersConfig {
    pub fn enabled(&self) -> Vec<ProviderKind> {
        let mut enabled = Vec::new();
        if self.stripe.is_some() {
            enabled.push(ProviderKind::Stripe);
        }
        if self.paystack.is_some() {
            enabled.push(ProviderKind::Paystack);
        }
        if self.flutterwave.is_some() {
            enabled.push(ProviderKind::Flutterwave);
        }
        if self.mpesa.is_some() {
            enabled.push(ProviderKind::Mpesa);
        }
        enabled
    }

    /// Fails closed: at least one provider, and no half-configured ones.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled().is_empty() {
            return Err(ValidationError::NoProviderConfigured);
        }
        if let Some(c) = &self.stripe {
            require_all("stripe", &[&c.secret_key, &c.webhook_secret])?;
        }
        if let Some(c) = &self.paystack {
            require_all("paystack", &[&c.secret_key])?;
        }
        if let Some(c) = &self.flutterwave {
            require_all("flutterwave", &[&c.secret_key, &c.webhook_hash])?;
        }
        if let Some(c) = &self.mpesa {
            require_all(
                "mpesa",
                &[
                    &c.consumer_key,
                    &c.consumer_secret,
                    &c.shortcode,
                    &c.passkey,
                    &c.callback_url,
                    &c.callback_token,
                ],
            )?;
        }
        Ok(())
    }
}

fn require_all(provider: &'static str, values: &[&String]) -> Result<(), ValidationError> {
    if values.iter().any(|v| v.trim().is_empty()) {
        return Err(ValidationError::IncompleteProvider(provider));
    }
    Ok(())
}

fn default_stripe_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_paystack_base() -> String {
    "https://api.paystack.co".to_string()
}

fn default_flutterwave_base() -> String {
    "https://api.flutterwave.com/v3".to_string()
}

fn default_mpesa_base() -> String {
    "https://sandbox.safaricom.co.ke".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_providers_fails_closed() {
        assert_eq!(
            ProvidersConfig::default().validate(),
            Err(ValidationError::NoProviderConfigured)
        );
    }

    #[test]
    fn test_blank_secret_rejected() {
        let config = ProvidersConfig {
            paystack: Some(PaystackConfig {
                secret_key: " ".to_string(),
                api_base: default_paystack_base(),
            }),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::IncompleteProvider("paystack")));
    }

    #[test]
    fn test_enabled_lists_configured_providers() {
        let config = ProvidersConfig {
            stripe: Some(StripeConfig {
                secret_key: "sk_test_1".to_string(),
                webhook_secret: "whsec_1".to_string(),
                api_base: default_stripe_base(),
            }),
            flutterwave: Some(FlutterwaveConfig {
                secret_key: "FLWSECK-1".to_string(),
                webhook_hash: "hash".to_string(),
                api_base: default_flutterwave_base(),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(
            config.enabled(),
            vec![ProviderKind::Stripe, ProviderKind::Flutterwave]
        );
    }
}
