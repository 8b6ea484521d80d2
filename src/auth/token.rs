//! Token codec - HMAC-signed JWTs carrying key claims.
//!
//! # Verification
//!
//! 1. Signature and algorithm are checked by `jsonwebtoken` against the
//!    service secret; only the HMAC family (HS256/HS384/HS512) is accepted.
//! 2. Expiry is checked here rather than by `jsonwebtoken`, with no leeway:
//!    a token is expired at or after its `exp` second. An expired token is
//!    reported together with its decoded claims, because expired *user* keys
//!    are handled by the key service (they are revoked on use) instead of
//!    being rejected outright.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::key::KeyType;
use crate::error::DenyReason;
use crate::{Error, Result};

/// Algorithm used for every token this service issues.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Decoded token payload.
///
/// Timestamps are Unix seconds. Empty strings and `None` values are left out
/// of the encoded token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// `iss`: principal the token acts for, or the system issuer.
    #[serde(rename = "iss", default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    /// `sub`: identity carried by session tokens.
    #[serde(rename = "sub", default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    /// `iat`
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// `exp`
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// `jti`: key ID, set for persisted keys only.
    #[serde(rename = "jti", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Credential class.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<KeyType>,
}

impl Claims {
    /// Returns `true` if `exp` is set and `now` is at or past it.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now.timestamp())
    }
}

/// Why a token failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not a decodable JWT, or its claims have the wrong shape.
    #[error("malformed token")]
    Malformed,
    /// Signature mismatch.
    #[error("invalid signature")]
    Signature,
    /// Header names an algorithm outside the HMAC family.
    #[error("unsupported algorithm")]
    Algorithm,
    /// Signature is valid but `exp` has passed.
    #[error("token expired")]
    Expired(Box<Claims>),
}

impl TokenError {
    /// Internal deny reason for audit logs.
    #[must_use]
    pub fn reason(&self) -> DenyReason {
        match self {
            Self::Malformed => DenyReason::MalformedToken,
            Self::Signature => DenyReason::BadSignature,
            Self::Algorithm => DenyReason::WrongAlgorithm,
            Self::Expired(_) => DenyReason::Expired,
        }
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        Error::Unauthorized(err.reason())
    }
}

/// Signs and verifies tokens with a single shared secret.
#[derive(Clone)]
pub struct Tokenizer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// Create a codec keyed by `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign `claims` into a compact token.
    pub fn issue(&self, claims: &Claims) -> Result<String> {
        jsonwebtoken::encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
    }

    /// Verify `token` and return its claims.
    pub fn parse(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        self.parse_at(token, Utc::now())
    }

    /// Verify `token` as of `now`.
    pub fn parse_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Claims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Malformed);
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::Signature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::Algorithm
                }
                _ => TokenError::Malformed,
            })?;

        let claims = data.claims;
        if claims.is_expired_at(now) {
            return Err(TokenError::Expired(Box::new(claims)));
        }

        Ok(claims)
    }
}
