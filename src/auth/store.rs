//! Key store - in-memory [`KeyRepository`].
//!
//! Keys are indexed by `(issuer, id)`, the same primary key a SQL-backed
//! repository would use. Conflict detection goes through the `DashMap` entry
//! API so that two concurrent saves of the same ID cannot both succeed.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::key::{Key, KeyRepository};
use crate::{Error, Result};

/// One-way digest stored in place of a user key's signed token.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory key repository backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryKeyRepository {
    keys: DashMap<(String, String), Key>,
}

impl InMemoryKeyRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn save(&self, key: Key) -> Result<String> {
        match self.keys.entry((key.issuer.clone(), key.id.clone())) {
            Entry::Occupied(_) => Err(Error::Conflict),
            Entry::Vacant(slot) => {
                let id = key.id.clone();
                slot.insert(key);
                debug!(key_id = %id, "Stored key");
                Ok(id)
            }
        }
    }

    async fn retrieve(&self, issuer: &str, id: &str) -> Result<Key> {
        self.keys
            .get(&(issuer.to_string(), id.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or(Error::NotFound)
    }

    async fn remove(&self, issuer: &str, id: &str) -> Result<()> {
        if self
            .keys
            .remove(&(issuer.to_string(), id.to_string()))
            .is_some()
        {
            debug!(key_id = %id, "Removed key");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::key::KeyType;
    use crate::error::ErrorKind;

    fn make_key(issuer: &str, id: &str) -> Key {
        let mut key = Key::new(KeyType::User);
        key.issuer = issuer.to_string();
        key.id = id.to_string();
        key.secret = hash_secret("token");
        key
    }

    #[tokio::test]
    async fn save_and_retrieve() {
        // GIVEN: a repository with one key
        let repo = InMemoryKeyRepository::new();
        let key = make_key("alice@example.com", "k1");

        // WHEN: saved and read back
        let id = repo.save(key.clone()).await.unwrap();
        let found = repo.retrieve("alice@example.com", "k1").await.unwrap();

        // THEN: the record is unchanged
        assert_eq!(id, "k1");
        assert_eq!(found, key);
    }

    #[tokio::test]
    async fn duplicate_id_conflicts() {
        let repo = InMemoryKeyRepository::new();
        repo.save(make_key("alice@example.com", "k1")).await.unwrap();

        let err = repo.save(make_key("alice@example.com", "k1")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn same_id_under_another_issuer_is_distinct() {
        let repo = InMemoryKeyRepository::new();
        repo.save(make_key("alice@example.com", "k1")).await.unwrap();

        assert!(repo.save(make_key("bob@example.com", "k1")).await.is_ok());
        assert_eq!(
            repo.retrieve("carol@example.com", "k1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let repo = InMemoryKeyRepository::new();
        repo.save(make_key("alice@example.com", "k1")).await.unwrap();

        assert!(repo.remove("alice@example.com", "k1").await.is_ok());
        assert!(repo.remove("alice@example.com", "k1").await.is_ok());
        assert!(repo.is_empty());
    }

    #[test]
    fn hash_secret_is_hex_sha256() {
        let digest = hash_secret("token");

        assert_eq!(digest.len(), 64);
        assert_ne!(digest, "token");
        assert_eq!(digest, hash_secret("token"));
    }
}
