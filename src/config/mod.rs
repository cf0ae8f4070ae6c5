//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables use the `CREATOR_BILLING`
//! prefix and `__` between nested keys.
//!
//! # Example
//!
//! ```no_run
//! use creator_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod auth;
mod billing;
mod database;
mod error;
mod providers;
mod server;

pub use auth::AuthConfig;
pub use billing::{BillingConfig, DunningConfig};
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use providers::{FlutterwaveConfig, MpesaConfig, PaystackConfig, ProvidersConfig, StripeConfig};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub billing: BillingConfig,

    #[serde(default)]
    pub dunning: DunningConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads variables with the `CREATOR_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// - `CREATOR_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `CREATOR_BILLING__DUNNING__BACKOFF_DAYS=1,3,7` -> `dunning.backoff_days = [1, 3, 7]`
    /// - `CREATOR_BILLING__PROVIDERS__MPESA__PASSKEY=...` -> enables M-Pesa
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("CREATOR_BILLING")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("dunning.backoff_days"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load and validate in one step.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values. Any failure is fatal.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.billing.validate()?;
        self.dunning.validate()?;
        self.providers.validate()?;
        self.auth.validate(&self.server.environment)?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[(&str, &str)] = &[
        ("CREATOR_BILLING__DATABASE__URL", "postgresql://test@localhost/billing"),
        ("CREATOR_BILLING__AUTH__JWT_SECRET", "jwt-secret"),
        ("CREATOR_BILLING__AUTH__JOB_SECRET", "job-secret"),
        ("CREATOR_BILLING__PROVIDERS__PAYSTACK__SECRET_KEY", "sk_test_paystack"),
    ];

    fn set_minimal_env() {
        for (k, v) in VARS {
            env::set_var(k, v);
        }
    }

    fn clear_env() {
        for (k, _) in VARS {
            env::remove_var(k);
        }
        env::remove_var("CREATOR_BILLING__DUNNING__BACKOFF_DAYS");
        env::remove_var("CREATOR_BILLING__BILLING__PLATFORM_FEE_BPS");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.expect("config loads");
        assert_eq!(config.database.url, "postgresql://test@localhost/billing");
        assert_eq!(config.providers.enabled(), vec![crate::domain::payments::ProviderKind::Paystack]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_billing_policy() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("CREATOR_BILLING__DUNNING__BACKOFF_DAYS", "2,4");
        env::set_var("CREATOR_BILLING__BILLING__PLATFORM_FEE_BPS", "750");
        let result = AppConfig::load();
        clear_env();

        let config = result.expect("config loads");
        assert_eq!(config.dunning.backoff_days, vec![2, 4]);
        assert_eq!(config.billing.platform_fee_bps, 750);
    }

    #[test]
    fn test_empty_config_fails_closed() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }
}
