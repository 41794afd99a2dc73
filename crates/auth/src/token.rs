//! Bearer token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;

use crate::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token could not be decoded: {0}")]
    Decode(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Verifies a raw bearer token and yields its claims.
///
/// `now` is passed in so callers (and tests) control the clock.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError>;
}

/// HMAC-SHA256 shared-secret validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks are done by `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                TokenError::Decode(e.to_string())
            })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn fresh_claims() -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: "admin".to_string(),
            role: Role::ADMIN,
            category: Some(modgate_core::Category::new("staff").unwrap()),
            issued_at: now - Duration::seconds(5),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_token_signed_with_same_secret() {
        let claims = fresh_claims();
        let token = mint("s3cret", &claims);
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());

        let decoded = validator.validate(&token, Utc::now()).unwrap();
        assert_eq!(decoded.sub, "admin");
        assert_eq!(decoded.role, Role::ADMIN);
        assert_eq!(decoded.category.unwrap().as_str(), "staff");
    }

    #[test]
    fn rejects_foreign_signature() {
        let token = mint("other", &fresh_claims());
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        assert!(matches!(
            validator.validate(&token, Utc::now()),
            Err(TokenError::Decode(_))
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let claims = fresh_claims();
        let token = mint("s3cret", &claims);
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        assert_eq!(
            validator.validate(&token, claims.expires_at + Duration::seconds(1)),
            Err(TokenError::Claims(TokenValidationError::Expired))
        );
    }
}
