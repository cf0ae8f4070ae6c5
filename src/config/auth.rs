//! Authentication configuration

use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

const MIN_SECRET_LEN: usize = 32;

/// Bearer token and scheduler credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// HS256 key used to verify identity tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default = "default_issuer")]
    pub jwt_issuer: String,

    /// Shared secret the external scheduler sends in `X-Job-Secret`
    #[serde(default)]
    pub job_secret: String,
}

impl AuthConfig {
    /// Validate authentication configuration
    ///
    /// Secrets are always required; production also enforces a minimum length.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        if self.jwt_secret.is_empty() {
            return Err(ValidationError::MissingRequired("CREATOR_BILLING__AUTH__JWT_SECRET"));
        }
        if self.job_secret.is_empty() {
            return Err(ValidationError::MissingRequired("CREATOR_BILLING__AUTH__JOB_SECRET"));
        }
        if *environment == Environment::Production {
            if self.jwt_secret.len() < MIN_SECRET_LEN {
                return Err(ValidationError::WeakSecret("CREATOR_BILLING__AUTH__JWT_SECRET"));
            }
            if self.job_secret.len() < MIN_SECRET_LEN {
                return Err(ValidationError::WeakSecret("CREATOR_BILLING__AUTH__JOB_SECRET"));
            }
        }
        Ok(())
    }
}

fn default_issuer() -> String {
    "creator-billing".to_string()
}
