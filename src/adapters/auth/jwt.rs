//! HS256 bearer token validation.
//!
//! The identity service issues tokens carrying `sub` (user id), `role`,
//! `iss`, and `exp`. This adapter only verifies them; issuing lives
//! elsewhere.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::domain::foundation::{AuthError, AuthenticatedUser, Role, UserId};
use crate::ports::SessionValidator;

/// Claims we require in every identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub role: Role,
    pub iss: String,
    pub exp: i64,
}

pub struct JwtSessionValidator {
    secret: SecretString,
    issuer: String,
}

impl JwtSessionValidator {
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            issuer: issuer.into(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.clone(), config.jwt_issuer.clone())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());

        let data = decode::<JwtClaims>(token, &key, &self.validation()).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("token expired");
                    AuthError::TokenExpired
                }
                ErrorKind::InvalidIssuer => {
                    tracing::warn!("invalid issuer in token");
                    AuthError::InvalidToken
                }
                _ => {
                    tracing::warn!(error = %e, "token validation failed");
                    AuthError::InvalidToken
                }
            }
        })?;

        let user_id = UserId::new(&data.claims.sub).map_err(|_| {
            tracing::warn!("token carries a blank subject");
            AuthError::InvalidToken
        })?;

        Ok(AuthenticatedUser::new(user_id, data.claims.role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const ISSUER: &str = "creator-billing";

    fn token(secret: &str, issuer: &str, role: Role, exp_offset: i64) -> String {
        let claims = JwtClaims {
            sub: "creator-1".to_string(),
            role,
            iss: issuer.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let validator = JwtSessionValidator::new(SECRET, ISSUER);
        let user = validator
            .validate(&token(SECRET, ISSUER, Role::Admin, 600))
            .await
            .unwrap();
        assert_eq!(user.id.as_str(), "creator-1");
        assert!(user.is_admin());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let validator = JwtSessionValidator::new(SECRET, ISSUER);
        let result = validator.validate(&token(SECRET, ISSUER, Role::Fan, -600)).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn wrong_issuer_or_key_is_rejected() {
        let validator = JwtSessionValidator::new(SECRET, ISSUER);
        let wrong_issuer = validator.validate(&token(SECRET, "elsewhere", Role::Fan, 600)).await;
        assert!(matches!(wrong_issuer, Err(AuthError::InvalidToken)));

        let other_key = "ffffffffffffffffffffffffffffffff";
        let wrong_key = validator.validate(&token(other_key, ISSUER, Role::Fan, 600)).await;
        assert!(matches!(wrong_key, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let validator = JwtSessionValidator::new(SECRET, ISSUER);
        assert!(validator.validate("not-a-jwt").await.is_err());
    }
}
