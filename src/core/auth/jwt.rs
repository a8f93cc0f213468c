//! Bearer access tokens
//!
//! HS256-signed, carrying the user's identity and a summary of their roles.
//! Verified statelessly on every request. Expiry is judged against the injected
//! clock rather than the system time so it can be driven from tests.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::core::db::models::{RoleSummary, UserId, UserWithRoles};

pub const DEFAULT_ACCESS_TOKEN_DAYS: i64 = 30;

const ISSUER: &str = "gatekeep";

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub lifetime: Duration,
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            lifetime: Duration::days(DEFAULT_ACCESS_TOKEN_DAYS),
            issuer: ISSUER.to_string(),
        }
    }

    pub fn lifetime_days(mut self, days: i64) -> Self {
        self.lifetime = Duration::days(days);
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Could not sign access token: {0}")]
    Sign(String),

    #[error("Access token expired")]
    Expired,

    /// Bad signature, wrong issuer, missing claims or garbage input
    #[error("Access token rejected")]
    Rejected,
}

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id as a decimal string
    pub sub: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub surname: String,
    pub role: Vec<RoleSummary>,
    pub active: bool,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    fn for_user(user: &UserWithRoles, issued_at: DateTime<Utc>, config: &JwtConfig) -> Self {
        let profile = &user.user;
        Self {
            sub: profile.id.to_string(),
            username: profile.username.clone(),
            email: profile.email.clone(),
            name: profile.name.clone(),
            surname: profile.surname.clone(),
            role: user.roles.iter().map(RoleSummary::from).collect(),
            active: profile.active,
            iat: issued_at.timestamp(),
            exp: (issued_at + config.lifetime).timestamp(),
            iss: config.issuer.clone(),
        }
    }

    pub fn user_id(&self) -> Result<UserId, JwtError> {
        self.sub.parse().map_err(|_| JwtError::Rejected)
    }
}

/// A signed token and the moment it stops being accepted
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        // checked in `verify` against the caller's clock
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        }
    }

    pub fn issue(&self, user: &UserWithRoles, now: DateTime<Utc>) -> Result<SignedToken, JwtError> {
        let claims = Claims::for_user(user, now, &self.config);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Sign(e.to_string()))?;

        Ok(SignedToken {
            token,
            expires_at: claims.exp,
        })
    }

    /// Check signature and issuer, then expiry relative to `now` with no leeway
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, JwtError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(kind = ?e.kind(), "Access token rejected");
                JwtError::Rejected
            })?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(JwtError::Expired);
        }
        Ok(claims)
    }
}
