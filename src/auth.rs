//! Authentication module.
//!
//! Token issuance and user management live in a separate identity service;
//! this API only verifies bearer JWTs and exposes the authenticated customer
//! as a single, well-defined principal (`CurrentUser`) that handlers thread
//! into every operation.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::AppState;

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,          // Subject (customer ID)
    pub name: Option<String>, // Customer's name
    pub email: Option<String>, // Customer's email
    pub jti: String,          // JWT ID (unique identifier for this token)
    pub iat: i64,             // Issued at time
    pub exp: i64,             // Expiration time
    pub iss: String,          // Issuer
    pub aud: String,          // Audience
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiration: Duration,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Expired authentication token")]
    ExpiredToken,

    #[error("Malformed principal: {0}")]
    MalformedPrincipal(String),

    #[error("Token creation failed")]
    TokenCreation,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Self::MissingToken => (StatusCode::UNAUTHORIZED, "AUTH_MISSING_TOKEN"),
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, "AUTH_INVALID_TOKEN"),
            Self::ExpiredToken => (StatusCode::UNAUTHORIZED, "AUTH_EXPIRED_TOKEN"),
            Self::MalformedPrincipal(_) => (StatusCode::UNAUTHORIZED, "AUTH_BAD_PRINCIPAL"),
            Self::TokenCreation => (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_INTERNAL_ERROR"),
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Verifies bearer tokens and issues access tokens for trusted callers
/// (tests, seed tooling).
pub struct AuthService {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Validates a JWT and returns its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })
    }

    /// Issues an access token for the given customer
    pub fn issue_access_token(
        &self,
        customer_id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: customer_id.to_string(),
            name: name.map(str::to_string),
            email: email.map(str::to_string),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.access_token_expiration.as_secs() as i64,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|_| AuthError::TokenCreation)
    }
}

/// Authenticated principal extracted from the bearer token.
///
/// This is the single source of the acting customer's identity; every cart
/// operation receives `customer_id` from here.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub customer_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub token_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or(AuthError::MissingToken)?;

        let claims = state.auth.validate_token(token)?;

        let customer_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AuthError::MalformedPrincipal(claims.sub.clone()))?;

        Ok(CurrentUser {
            customer_id,
            name: claims.name,
            email: claims.email,
            token_id: claims.jti,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "unit_test_secret_that_is_at_least_32_chars!".to_string(),
            issuer: "cart-api".to_string(),
            audience: "cart-api-clients".to_string(),
            access_token_expiration: Duration::from_secs(3600),
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let service = AuthService::new(test_auth_config());
        let customer_id = Uuid::new_v4();

        let token = service
            .issue_access_token(customer_id, Some("Ana Alvarez"), Some("ana@example.com"))
            .unwrap();
        let claims = service.validate_token(&token).unwrap();

        assert_eq!(claims.sub, customer_id.to_string());
        assert_eq!(claims.name.as_deref(), Some("Ana Alvarez"));
        assert_eq!(claims.email.as_deref(), Some("ana@example.com"));
        assert_eq!(claims.iss, "cart-api");
        assert_eq!(claims.aud, "cart-api-clients");
    }

    #[test]
    fn garbage_token_is_rejected() {
        let service = AuthService::new(test_auth_config());
        assert!(matches!(
            service.validate_token("not-a-jwt"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn token_for_other_audience_is_rejected() {
        let mut other_config = test_auth_config();
        other_config.audience = "another-service".to_string();
        let other_service = AuthService::new(other_config);

        let token = other_service
            .issue_access_token(Uuid::new_v4(), None, None)
            .unwrap();

        let service = AuthService::new(test_auth_config());
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_auth_config();
        let service = AuthService::new(config.clone());

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            name: None,
            email: None,
            jti: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::ExpiredToken)
        ));
    }
}
