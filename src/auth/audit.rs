//! Audit logging for key lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with structured fields, making
//! the audit trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `key.issued` | A key of any type is issued |
//! | `key.retrieved` | A user key record is read by its owner |
//! | `key.revoked` | A user key is explicitly revoked |
//! | `key.expired` | An expired user key is found and deleted on use |
//! | `token.denied` | A token or access-control check is rejected |
//!
//! `token.denied` carries the internal deny reason. It is written to the log
//! only and never returned to the caller.

use serde::Serialize;

use super::key::{Key, KeyType};
use crate::error::DenyReason;

/// Structured audit event emitted for every key lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"key.issued"`).
    pub event: &'static str,
    /// Identity the key belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Affected key ID (user keys only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Affected key type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<KeyType>,
    /// Operation during which a denial happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<&'static str>,
    /// Internal reason for `token.denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl AuditEvent {
    fn blank(event: &'static str) -> Self {
        Self {
            event,
            identity: None,
            key_id: None,
            key_type: None,
            operation: None,
            reason: None,
        }
    }

    /// Construct a `key.issued` event.
    #[must_use]
    pub fn issued(identity: &str, key: &Key) -> Self {
        Self {
            identity: Some(identity.to_string()),
            key_id: (!key.id.is_empty()).then(|| key.id.clone()),
            key_type: Some(key.key_type),
            ..Self::blank("key.issued")
        }
    }

    /// Construct a `key.retrieved` event.
    #[must_use]
    pub fn retrieved(identity: &str, id: &str) -> Self {
        Self {
            identity: Some(identity.to_string()),
            key_id: Some(id.to_string()),
            ..Self::blank("key.retrieved")
        }
    }

    /// Construct a `key.revoked` event.
    #[must_use]
    pub fn revoked(identity: &str, id: &str) -> Self {
        Self {
            identity: Some(identity.to_string()),
            key_id: Some(id.to_string()),
            ..Self::blank("key.revoked")
        }
    }

    /// Construct a `key.expired` event.
    #[must_use]
    pub fn expired(identity: &str, id: &str) -> Self {
        Self {
            identity: Some(identity.to_string()),
            key_id: Some(id.to_string()),
            key_type: Some(KeyType::User),
            ..Self::blank("key.expired")
        }
    }

    /// Construct a `token.denied` event.
    #[must_use]
    pub fn denied(operation: &'static str, reason: DenyReason) -> Self {
        Self {
            operation: Some(operation),
            reason: Some(reason.as_str()),
            ..Self::blank("token.denied")
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO devicegate::auth::audit audit={"event":"key.issued","identity":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "key service audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
