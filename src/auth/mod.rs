//! Key service - issuance, retrieval, revocation and verification of
//! bearer credentials.
//!
//! Three credential classes share one token format (see [`token`]):
//!
//! | Type | Needed to issue | Stored | Expiry |
//! |------|-----------------|--------|--------|
//! | [`KeyType::Login`] | nothing (primary auth happens upstream) | no | `login_duration` |
//! | [`KeyType::Reset`] | a valid login key | no | `reset_duration` |
//! | [`KeyType::User`] | a valid login key | yes | caller-defined, none by default |
//!
//! Login and reset keys are verified from signature and embedded expiry
//! alone. User keys are also looked up in the [`KeyRepository`], which acts
//! as the revocation list: deleting the record revokes the key. An expired
//! user key is deleted by the first [`KeyService::identify`] or
//! [`KeyService::retrieve`] call that sees it; there is no background sweep.
//!
//! Every credential failure surfaces as [`Error::Unauthorized`] with the same
//! message. The detailed reason only goes to the audit log.

pub mod audit;
pub mod handler;
pub mod idp;
pub mod key;
pub mod store;
pub mod token;

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::DenyReason;
use crate::{Error, Result};

pub use audit::AuditEvent;
pub use idp::UuidIdentityProvider;
pub use key::{IdentityProvider, Key, KeyRepository, KeyType};
pub use store::{InMemoryKeyRepository, hash_secret};
pub use token::{Claims, TokenError, Tokenizer};

/// Default issuer name placed in session tokens.
pub const DEFAULT_ISSUER_NAME: &str = "devicegate.auth";

/// The authentication core.
///
/// Stateless apart from the repository: no locking happens here, so
/// concurrent calls rely on the repository's own atomicity.
pub struct KeyService {
    keys: Arc<dyn KeyRepository>,
    idp: Arc<dyn IdentityProvider>,
    tokenizer: Tokenizer,
    issuer_name: String,
    login_duration: Duration,
    reset_duration: Duration,
}

impl KeyService {
    /// Create a service with the default issuer name and durations
    /// (10 hours for login keys, 5 minutes for reset keys).
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyRepository>,
        idp: Arc<dyn IdentityProvider>,
        secret: &str,
    ) -> Self {
        Self {
            keys,
            idp,
            tokenizer: Tokenizer::new(secret),
            issuer_name: DEFAULT_ISSUER_NAME.to_string(),
            login_duration: Duration::hours(10),
            reset_duration: Duration::minutes(5),
        }
    }

    /// Create a service from the `auth` configuration section.
    pub fn from_config(
        keys: Arc<dyn KeyRepository>,
        idp: Arc<dyn IdentityProvider>,
        config: &AuthConfig,
    ) -> Result<Self> {
        let secret = config.resolve_secret()?;
        let login_duration = Duration::from_std(config.login_duration)
            .map_err(|e| Error::Config(format!("login_duration out of range: {e}")))?;
        let reset_duration = Duration::from_std(config.reset_duration)
            .map_err(|e| Error::Config(format!("reset_duration out of range: {e}")))?;

        Ok(Self {
            keys,
            idp,
            tokenizer: Tokenizer::new(&secret),
            issuer_name: config.issuer_name.clone(),
            login_duration,
            reset_duration,
        })
    }

    /// Issuer name written into session tokens.
    #[must_use]
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// Issue a new key of `key.key_type` on behalf of `issuer`.
    ///
    /// For login keys `issuer` is the identity established by primary
    /// authentication. For reset and user keys it must be a valid login key
    /// token. The returned key carries the signed token in `secret`; for
    /// user keys this is the only time the plaintext token is available.
    pub async fn issue(&self, issuer: &str, key: Key) -> Result<Key> {
        if key.issued_at.timestamp_subsec_nanos() == 0 {
            return Err(Error::InvalidKeyIssuedAt);
        }

        match key.key_type {
            KeyType::Login => {
                if issuer.is_empty() {
                    return Err(Error::MalformedEntity("empty issuer".to_string()));
                }
                self.session_key(issuer.to_string(), self.login_duration, key)
            }
            KeyType::Reset => {
                let identity = self
                    .login(issuer, "issue reset key")
                    .await
                    .map_err(|e| e.during("issue reset key"))?;
                self.session_key(identity, self.reset_duration, key)
            }
            KeyType::User => self.user_key(issuer, key).await,
        }
    }

    /// Revoke the user key `id` owned by the holder of login key `issuer`.
    ///
    /// Revoking a key that does not exist succeeds.
    pub async fn revoke(&self, issuer: &str, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::MalformedEntity("empty key id".to_string()));
        }

        let identity = self
            .login(issuer, "revoke key")
            .await
            .map_err(|e| e.during("revoke key"))?;
        self.keys
            .remove(&identity, id)
            .await
            .map_err(|e| e.during("revoke key"))?;

        audit::emit(&AuditEvent::revoked(&identity, id));
        Ok(())
    }

    /// Fetch the stored record of user key `id` owned by the holder of login
    /// key `issuer`. The record's `secret` is the stored digest, not the
    /// token.
    pub async fn retrieve(&self, issuer: &str, id: &str) -> Result<Key> {
        if id.is_empty() {
            return Err(Error::MalformedEntity("empty key id".to_string()));
        }

        let identity = self
            .login(issuer, "retrieve key")
            .await
            .map_err(|e| e.during("retrieve key"))?;
        let key = self
            .keys
            .retrieve(&identity, id)
            .await
            .map_err(|e| e.during("retrieve key"))?;

        if key.is_expired() {
            self.revoke_expired(&identity, id).await;
            return Err(deny("retrieve key", DenyReason::KeyExpired).during("retrieve key"));
        }

        audit::emit(&AuditEvent::retrieved(&identity, id));
        Ok(key)
    }

    /// Resolve a bearer token to the identity it acts for.
    pub async fn identify(&self, token: &str) -> Result<String> {
        let claims = match self.tokenizer.parse(token) {
            Ok(claims) => claims,
            // Expired user keys get past the codec so the record is revoked.
            Err(TokenError::Expired(claims)) if claims.key_type == Some(KeyType::User) => *claims,
            Err(e) => return Err(deny("identify", e.reason())),
        };

        self.identify_claims(claims, "identify").await
    }

    async fn identify_claims(&self, claims: Claims, op: &'static str) -> Result<String> {
        match claims.key_type {
            Some(KeyType::User) => {
                let key = self.keys.retrieve(&claims.issuer, &claims.id).await?;
                if key.is_expired() {
                    self.revoke_expired(&claims.issuer, &claims.id).await;
                    return Err(deny(op, DenyReason::KeyExpired));
                }
                Ok(claims.issuer)
            }
            Some(KeyType::Login) => {
                if claims.subject.is_empty() {
                    return Err(deny(op, DenyReason::MissingClaim));
                }
                Ok(claims.subject)
            }
            Some(KeyType::Reset) => {
                if claims.issuer.is_empty() {
                    return Err(deny(op, DenyReason::MissingClaim));
                }
                Ok(claims.issuer)
            }
            None => Err(deny(op, DenyReason::WrongKeyType)),
        }
    }

    /// Resolve a login key token to its identity. Any other key type is
    /// refused.
    async fn login(&self, token: &str, op: &'static str) -> Result<String> {
        let claims = self.tokenizer.parse(token).map_err(|e| deny(op, e.reason()))?;
        if claims.key_type != Some(KeyType::Login) {
            return Err(deny(op, DenyReason::WrongKeyType));
        }
        self.identify_claims(claims, op).await
    }

    fn session_key(&self, subject: String, duration: Duration, mut key: Key) -> Result<Key> {
        // `exp` has whole-second resolution; the returned expiry matches it.
        let expires_at = (key.issued_at + duration).trunc_subsecs(0);
        let claims = Claims {
            issuer: self.issuer_name.clone(),
            subject,
            issued_at: key.issued_at.timestamp(),
            expires_at: Some(expires_at.timestamp()),
            id: String::new(),
            key_type: Some(key.key_type),
        };

        key.id = String::new();
        key.issuer.clone_from(&self.issuer_name);
        key.expires_at = Some(expires_at);
        key.secret = self.tokenizer.issue(&claims)?;

        audit::emit(&AuditEvent::issued(&claims.subject, &key));
        Ok(key)
    }

    async fn user_key(&self, issuer: &str, mut key: Key) -> Result<Key> {
        let identity = self
            .login(issuer, "issue user key")
            .await
            .map_err(|e| e.during("issue user key"))?;
        let id = self.idp.id().map_err(|e| e.during("issue user key"))?;

        key.id = id;
        key.issuer = identity;
        let claims = Claims {
            issuer: key.issuer.clone(),
            subject: String::new(),
            issued_at: key.issued_at.timestamp(),
            expires_at: key.expires_at.map(|exp| exp.timestamp()),
            id: key.id.clone(),
            key_type: Some(KeyType::User),
        };
        let token = self.tokenizer.issue(&claims)?;

        let record = Key {
            secret: hash_secret(&token),
            ..key.clone()
        };
        self.keys
            .save(record)
            .await
            .map_err(|e| e.during("issue user key"))?;

        key.secret = token;
        debug!(key_id = %key.id, "Issued user key");
        audit::emit(&AuditEvent::issued(&key.issuer, &key));
        Ok(key)
    }

    /// Delete an expired user key. Runs on the read path, so failures are
    /// logged rather than returned; a concurrent delete of the same row is
    /// a no-op for the repository.
    async fn revoke_expired(&self, issuer: &str, id: &str) {
        if let Err(e) = self.keys.remove(issuer, id).await {
            warn!(key_id = %id, error = %e, "Failed to remove expired key");
        }
        audit::emit(&AuditEvent::expired(issuer, id));
    }
}

/// Record a credential rejection and produce the caller-facing error.
fn deny(op: &'static str, reason: DenyReason) -> Error {
    audit::emit(&AuditEvent::denied(op, reason));
    Error::Unauthorized(reason)
}

/// Current time for a new key request.
///
/// `Utc::now()` can, rarely, land on a whole second. Such a timestamp is
/// indistinguishable from an uninitialised one and would be refused by
/// [`KeyService::issue`], so it is nudged by one nanosecond.
#[must_use]
pub fn issue_time() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    if now.timestamp_subsec_nanos() == 0 {
        now + Duration::nanoseconds(1)
    } else {
        now
    }
}
