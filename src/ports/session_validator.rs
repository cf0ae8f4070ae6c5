//! Session validation port for bearer token validation.
//!
//! Implementations MUST validate issuer, expiry, and signature before
//! returning an identity.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}
