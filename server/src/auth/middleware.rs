use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// JWT claims extracted from Authorization: Bearer header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        // Get JWT secret from request extensions (set by middleware layer)
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| AppError::Internal("JWT secret not configured".into()))?;

        decode_token(&jwt_secret.0, token)
    }
}

/// Validate an HS256 access token and return its claims.
pub fn decode_token(secret: &[u8], token: &str) -> Result<Claims, AppError> {
    let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        AppError::Unauthorized
    })
}

/// JWT secret stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &[u8], sub: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            iat: now,
            exp: now + exp_offset,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_valid_token_decodes() {
        let claims = decode_token(b"secret", &token(b"secret", "u1", 3600)).unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[test]
    fn test_wrong_secret_and_expired_tokens_are_rejected() {
        assert!(matches!(
            decode_token(b"other", &token(b"secret", "u1", 3600)),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            decode_token(b"secret", &token(b"secret", "u1", -3600)),
            Err(AppError::Unauthorized)
        ));
    }
}
