//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation.
///
/// All of these are fatal: the service refuses to start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Platform fee must be at most 10000 basis points")]
    InvalidPlatformFee,

    #[error("Billing period must be at least one day")]
    InvalidBillingPeriod,

    #[error("Dunning backoff schedule must not be empty")]
    EmptyBackoffSchedule,

    #[error("Dunning max_attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("No payment provider configured")]
    NoProviderConfigured,

    #[error("Incomplete credentials for provider {0}")]
    IncompleteProvider(&'static str),

    #[error("Secret {0} is too short")]
    WeakSecret(&'static str),
}
