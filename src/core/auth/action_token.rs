//! Signed action tokens for confirmation and password-reset links
//!
//! A token is `b64(value).b64(issued_at).b64(mac)` where `mac` is HMAC-SHA256 over
//! the salt and the first two segments, keyed by the application secret. Each
//! purpose uses its own salt, so a confirmation token never verifies as a reset
//! token. All segments are URL-safe base64 without padding. A bound token also
//! mixes caller-held state into the MAC without carrying it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::core::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Salt for account confirmation links
pub const CONFIRMATION_SALT: &str = "gatekeep.account-confirmation";
/// Salt for password reset links
pub const PASSWORD_RESET_SALT: &str = "gatekeep.password-reset";

/// Action token errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token signature mismatch")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Invalid signing key")]
    InvalidKey,
}

/// Keyed, tamper-evident codec for a single integer identifier
#[derive(Clone)]
pub struct ActionTokenCodec {
    secret: Vec<u8>,
    salt: &'static str,
    max_age: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl ActionTokenCodec {
    pub fn new(secret: impl AsRef<[u8]>, salt: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            salt,
            max_age: None,
            clock,
        }
    }

    /// Reject tokens older than `max_age` on decode
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidKey)?;
        mac.update(self.salt.as_bytes());
        mac.update(b".");
        Ok(mac)
    }

    fn signed_mac(
        &self,
        payload: &str,
        issued_at: &str,
        binding: Option<&[u8]>,
    ) -> Result<HmacSha256, TokenError> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.update(b".");
        mac.update(issued_at.as_bytes());
        if let Some(binding) = binding {
            mac.update(b".");
            mac.update(binding);
        }
        Ok(mac)
    }

    pub fn encrypt(&self, value: i64) -> Result<String, TokenError> {
        self.sign(value, None)
    }

    /// Like [`encrypt`](Self::encrypt), but the signature also covers `binding`.
    ///
    /// The binding is not carried in the token. The token only verifies while the
    /// caller can present the same binding, so once the bound state changes every
    /// token issued against it is dead.
    pub fn encrypt_bound(&self, value: i64, binding: &[u8]) -> Result<String, TokenError> {
        self.sign(value, Some(binding))
    }

    fn sign(&self, value: i64, binding: Option<&[u8]>) -> Result<String, TokenError> {
        let payload = URL_SAFE_NO_PAD.encode(value.to_string());
        let issued_at = URL_SAFE_NO_PAD.encode(self.clock.now().timestamp().to_string());
        let signature = self
            .signed_mac(&payload, &issued_at, binding)?
            .finalize()
            .into_bytes();

        Ok(format!(
            "{payload}.{issued_at}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn decrypt(&self, token: &str) -> Result<i64, TokenError> {
        self.verify(token, None)
    }

    pub fn decrypt_bound(&self, token: &str, binding: &[u8]) -> Result<i64, TokenError> {
        self.verify(token, Some(binding))
    }

    /// Read the value without checking the signature or age.
    ///
    /// Only for finding the record whose state a bound token must be checked
    /// against. Never trust the result before `decrypt_bound` succeeds.
    pub fn peek(&self, token: &str) -> Result<i64, TokenError> {
        let (payload, _, _) = split(token)?;
        decode_i64(payload)
    }

    fn verify(&self, token: &str, binding: Option<&[u8]>) -> Result<i64, TokenError> {
        let (payload, issued_at, signature) = split(token)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        self.signed_mac(payload, issued_at, binding)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let issued_at = decode_i64(issued_at)?;
        if let Some(max_age) = self.max_age {
            let age = self.clock.now().timestamp() - issued_at;
            if age > max_age.num_seconds() {
                return Err(TokenError::Expired);
            }
        }

        decode_i64(payload)
    }
}

fn split(token: &str) -> Result<(&str, &str, &str), TokenError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(payload), Some(issued_at), Some(signature), None) => {
            Ok((payload, issued_at, signature))
        }
        _ => Err(TokenError::Malformed),
    }
}

fn decode_i64(segment: &str) -> Result<i64, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    std::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(TokenError::Malformed)
}
