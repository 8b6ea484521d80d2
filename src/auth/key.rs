//! Credential records and the collaborator contracts the key service needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The three credential classes.
///
/// `Login` and `Reset` keys are stateless signed tokens; `User` keys are
/// additionally persisted so that they can be revoked before they expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Short-lived session key obtained after primary login.
    Login,
    /// Very short-lived key scoped to a password reset.
    Reset,
    /// Long-lived, individually revocable API key.
    User,
}

impl KeyType {
    /// Numeric wire value used by transport requests.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Login => 0,
            Self::Reset => 1,
            Self::User => 2,
        }
    }
}

impl TryFrom<u32> for KeyType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Login),
            1 => Ok(Self::Reset),
            2 => Ok(Self::User),
            other => Err(Error::MalformedEntity(format!("unsupported key type {other}"))),
        }
    }
}

/// A credential record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Key ID. Empty for session keys.
    #[serde(default)]
    pub id: String,
    /// Credential class.
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// Principal the key acts for, or the system issuer for session keys.
    #[serde(default)]
    pub issuer: String,
    /// Signed token on issuance; SHA-256 digest of it in the repository.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    /// Issuance time. Must carry a non-zero sub-second component.
    pub issued_at: DateTime<Utc>,
    /// Expiry. `None` means the key never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Key {
    /// A fresh key request of `key_type`, issued now, with no expiry.
    #[must_use]
    pub fn new(key_type: KeyType) -> Self {
        Self {
            id: String::new(),
            key_type,
            issuer: String::new(),
            secret: String::new(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Set an explicit expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns `true` if the key has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Returns `true` if the key has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Key persistence API.
///
/// Implementations must provide their own atomicity: `save` has to detect a
/// duplicate `(issuer, id)` and `remove` has to tolerate a missing row, since
/// the service does no locking of its own.
#[async_trait::async_trait]
pub trait KeyRepository: Send + Sync + 'static {
    /// Persist a key. Returns its ID, or [`Error::Conflict`] on duplicate.
    async fn save(&self, key: Key) -> Result<String>;

    /// Fetch the key `id` issued by `issuer`, or [`Error::NotFound`].
    async fn retrieve(&self, issuer: &str, id: &str) -> Result<Key>;

    /// Delete the key `id` issued by `issuer`. Deleting a missing key is not
    /// an error.
    async fn remove(&self, issuer: &str, id: &str) -> Result<()>;
}

/// Source of globally unique key identifiers.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Generate a new unique identifier.
    fn id(&self) -> Result<String>;
}
