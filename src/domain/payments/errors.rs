//! The billing error taxonomy shared by every service and the HTTP surface.
//!
//! Variants fall into five groups: verification failures (never retried by
//! us), idempotent no-ops (not errors at all, see `ProcessOutcome`),
//! business-rule violations, transient infrastructure failures (retryable),
//! and fatal configuration problems (fail closed).

use axum::http::StatusCode;
use thiserror::Error;

use super::ProviderKind;
use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};

#[derive(Debug, Clone, Error)]
pub enum BillingError {
    // Verification
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    // Business rules
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Not permitted")]
    Forbidden,

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Wallet is frozen")]
    WalletFrozen,

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("{0} payout limit exceeded")]
    LimitExceeded(&'static str),

    #[error("An active subscription already exists for this tier")]
    ActiveSubscriptionExists,

    #[error("Currency {currency} is not supported by {provider}")]
    UnsupportedCurrency {
        provider: ProviderKind,
        currency: String,
    },

    #[error("Payment declined: {0}")]
    Declined(String),

    // Transient
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider timed out")]
    ProviderTimeout,

    #[error("Storage error: {0}")]
    Storage(String),

    // Fatal
    #[error("Provider {0} is not configured")]
    ProviderNotConfigured(ProviderKind),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BillingError {
    /// Returns true if the caller (provider or scheduler) should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ProviderUnavailable(_)
                | BillingError::ProviderTimeout
                | BillingError::Storage(_)
        )
    }

    /// Maps the error to an HTTP status code.
    ///
    /// Providers retry on 5xx and give up on 4xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::InvalidSignature => StatusCode::UNAUTHORIZED,
            BillingError::MalformedPayload(_) | BillingError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            BillingError::UnknownProvider(_) | BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Forbidden => StatusCode::FORBIDDEN,
            BillingError::InvalidTransition(_)
            | BillingError::ActiveSubscriptionExists
            | BillingError::WalletFrozen => StatusCode::CONFLICT,
            BillingError::InsufficientBalance { .. }
            | BillingError::LimitExceeded(_)
            | BillingError::UnsupportedCurrency { .. }
            | BillingError::Declined(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::ProviderUnavailable(_) | BillingError::ProviderTimeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BillingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BillingError::ProviderNotConfigured(_) | BillingError::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            BillingError::InvalidSignature => "INVALID_SIGNATURE",
            BillingError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            BillingError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::Forbidden => "FORBIDDEN",
            BillingError::InvalidTransition(_) => "INVALID_STATE_TRANSITION",
            BillingError::Validation(_) => "VALIDATION_FAILED",
            BillingError::WalletFrozen => "WALLET_FROZEN",
            BillingError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BillingError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            BillingError::ActiveSubscriptionExists => "ACTIVE_SUBSCRIPTION_EXISTS",
            BillingError::UnsupportedCurrency { .. } => "UNSUPPORTED_CURRENCY",
            BillingError::Declined(_) => "DECLINED",
            BillingError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            BillingError::ProviderTimeout => "PROVIDER_TIMEOUT",
            BillingError::Storage(_) => "STORAGE_ERROR",
            BillingError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            BillingError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Human-readable reason safe for non-admin callers.
    ///
    /// Never includes provider references or raw adapter text.
    pub fn public_message(&self) -> String {
        match self {
            BillingError::InvalidSignature => "Signature verification failed".to_string(),
            BillingError::MalformedPayload(_) => "The request payload could not be read".to_string(),
            BillingError::UnknownProvider(_) => "Unknown payment provider".to_string(),
            BillingError::NotFound(what) => format!("{} not found", what),
            BillingError::Forbidden => "You are not allowed to perform this action".to_string(),
            BillingError::InvalidTransition(_) => {
                "This action is not allowed in the current state".to_string()
            }
            BillingError::Validation(msg) => msg.clone(),
            BillingError::WalletFrozen => {
                "Payouts are paused while a dispute is under review".to_string()
            }
            BillingError::InsufficientBalance { .. } => {
                "The requested amount exceeds your available balance".to_string()
            }
            BillingError::LimitExceeded(window) => {
                format!("The requested amount exceeds your {} payout limit", window)
            }
            BillingError::ActiveSubscriptionExists => {
                "You already have an active subscription to this tier".to_string()
            }
            BillingError::UnsupportedCurrency { currency, .. } => {
                format!("{} is not supported for this payment method", currency)
            }
            BillingError::Declined(_) => "The payment provider declined the request".to_string(),
            BillingError::ProviderUnavailable(_) | BillingError::ProviderTimeout => {
                "The payment provider is temporarily unavailable, please retry".to_string()
            }
            BillingError::Storage(_) => "A temporary error occurred, please retry".to_string(),
            BillingError::ProviderNotConfigured(_) | BillingError::Configuration(_) => {
                "Payments are temporarily unavailable".to_string()
            }
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::PaymentNotFound => BillingError::NotFound("Payment"),
            ErrorCode::SubscriptionNotFound => BillingError::NotFound("Subscription"),
            ErrorCode::PayoutNotFound => BillingError::NotFound("Payout"),
            ErrorCode::ChargebackNotFound => BillingError::NotFound("Chargeback"),
            ErrorCode::WalletNotFound => BillingError::NotFound("Wallet"),
            ErrorCode::ValidationFailed => BillingError::Validation(err.message),
            ErrorCode::InvalidStateTransition => BillingError::InvalidTransition(err.message),
            ErrorCode::DuplicateReference => BillingError::Validation(err.message),
            ErrorCode::ConcurrentModification
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => BillingError::Storage(err.message),
        }
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::InvalidFormat { field, .. } if field == "state_transition" => {
                BillingError::InvalidTransition(err.to_string())
            }
            _ => BillingError::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ══════════════════════════════════════════════════════════════
    // Retryability
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn transient_errors_are_retryable() {
        assert!(BillingError::ProviderTimeout.is_retryable());
        assert!(BillingError::ProviderUnavailable("503".into()).is_retryable());
        assert!(BillingError::Storage("pool".into()).is_retryable());
    }

    #[test]
    fn verification_and_business_errors_are_not_retryable() {
        assert!(!BillingError::InvalidSignature.is_retryable());
        assert!(!BillingError::MalformedPayload("x".into()).is_retryable());
        assert!(!BillingError::WalletFrozen.is_retryable());
        assert!(!BillingError::Declined("card".into()).is_retryable());
        assert!(!BillingError::Configuration("missing".into()).is_retryable());
    }

    // ══════════════════════════════════════════════════════════════
    // Status Codes
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn verification_errors_are_client_errors() {
        assert_eq!(BillingError::InvalidSignature.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            BillingError::MalformedPayload("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn retryable_errors_are_server_errors() {
        for err in [
            BillingError::ProviderTimeout,
            BillingError::ProviderUnavailable("x".into()),
            BillingError::Storage("x".into()),
        ] {
            assert!(err.status_code().is_server_error(), "{:?}", err);
        }
    }

    #[test]
    fn business_rules_are_client_errors() {
        assert_eq!(BillingError::WalletFrozen.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            BillingError::InsufficientBalance { available: 1, requested: 2 }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    // ══════════════════════════════════════════════════════════════
    // Public Messages
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn public_message_hides_adapter_detail() {
        let err = BillingError::Declined("pi_3Nx declined: insufficient_funds".into());
        assert!(!err.public_message().contains("pi_3Nx"));

        let err = BillingError::ProviderUnavailable("paystack 502 ref=T123".into());
        assert!(!err.public_message().contains("T123"));
    }

    #[test]
    fn domain_errors_map_into_taxonomy() {
        let err: BillingError = DomainError::database("connection reset").into();
        assert!(err.is_retryable());

        let err: BillingError =
            DomainError::new(ErrorCode::SubscriptionNotFound, "missing").into();
        assert!(matches!(err, BillingError::NotFound("Subscription")));
    }

    #[test]
    fn state_transition_validation_maps_to_invalid_transition() {
        let err: BillingError =
            ValidationError::invalid_format("state_transition", "Pending -> Pending").into();
        assert!(matches!(err, BillingError::InvalidTransition(_)));
    }
}
