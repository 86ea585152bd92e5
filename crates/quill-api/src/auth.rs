use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use quill_core::OwnerId;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

/// Caller resolved from a verified bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub owner: OwnerId,
}

/// HS256 verifier and issuer sharing one secret
#[derive(Clone)]
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
}

impl JwtVerifier {
    pub fn new(config: &AppConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = config.auth_clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = config.jwt_issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        Self {
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let decoded = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        let subject = decoded.claims.sub.trim();
        if subject.is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        Ok(AuthenticatedUser {
            owner: OwnerId::new(subject),
        })
    }

    /// Issue a token whose subject is `owner`
    pub fn mint(&self, owner: &OwnerId, ttl: Duration) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| AppError::bad_request("Token lifetime is too large"))?;
        let claims = Claims {
            sub: owner.as_str().to_string(),
            exp: now.saturating_add(ttl),
            iat: now,
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| AppError::Internal(format!("Token encoding failed: {}", sanitize(&error))))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}
