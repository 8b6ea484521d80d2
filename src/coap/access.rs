//! Channel access control - resolves a thing key to the thing allowed on a
//! channel.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DenyReason;
use crate::{Error, Result};

/// Decides whether the holder of `key` may use channel `chan_id`.
#[async_trait]
pub trait AccessControl: Send + Sync + 'static {
    /// Return the thing ID behind `key` if it is connected to `chan_id`.
    /// Any error is a denial.
    async fn can_access_by_key(&self, key: &str, chan_id: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct AccessByKeyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct AccessByKeyResponse {
    id: String,
}

/// [`AccessControl`] backed by the things service HTTP API:
/// `POST {base}/identify/channels/{chan_id}/access-by-key`.
#[derive(Debug, Clone)]
pub struct HttpAccessControl {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAccessControl {
    /// Create a client for the things service at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("things client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl AccessControl for HttpAccessControl {
    async fn can_access_by_key(&self, key: &str, chan_id: &str) -> Result<String> {
        if key.is_empty() || chan_id.is_empty() {
            return Err(Error::Unauthorized(DenyReason::AccessDenied));
        }

        let url = format!(
            "{}/identify/channels/{chan_id}/access-by-key",
            self.base_url
        );
        let response = self
            .http
            .post(&url)
            .json(&AccessByKeyRequest { token: key })
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("things service: {e}")))?;

        if !response.status().is_success() {
            debug!(channel = %chan_id, status = %response.status(), "Channel access denied");
            return Err(Error::Unauthorized(DenyReason::AccessDenied));
        }

        let body: AccessByKeyResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("things service response: {e}")))?;
        Ok(body.id)
    }
}

/// In-memory [`AccessControl`] holding explicit `(key, channel)` grants.
#[derive(Debug, Default)]
pub struct StaticAccessControl {
    grants: DashMap<(String, String), String>,
}

impl StaticAccessControl {
    /// Create with no grants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow the thing `thing_id`, holding `key`, on `chan_id`.
    pub fn grant(&self, key: &str, chan_id: &str, thing_id: &str) {
        self.grants
            .insert((key.to_string(), chan_id.to_string()), thing_id.to_string());
    }

    /// Withdraw a grant.
    pub fn revoke(&self, key: &str, chan_id: &str) {
        self.grants.remove(&(key.to_string(), chan_id.to_string()));
    }
}

#[async_trait]
impl AccessControl for StaticAccessControl {
    async fn can_access_by_key(&self, key: &str, chan_id: &str) -> Result<String> {
        self.grants
            .get(&(key.to_string(), chan_id.to_string()))
            .map(|thing| thing.value().clone())
            .ok_or(Error::Unauthorized(DenyReason::AccessDenied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_grants_are_per_channel() {
        // GIVEN: a key granted on ch1 only
        let access = StaticAccessControl::new();
        access.grant("key", "ch1", "thing-1");

        // THEN: ch1 resolves, ch2 is denied
        assert_eq!(access.can_access_by_key("key", "ch1").await.unwrap(), "thing-1");
        assert!(access.can_access_by_key("key", "ch2").await.unwrap_err().is_unauthorized());
    }

    #[tokio::test]
    async fn revoked_grant_is_denied() {
        let access = StaticAccessControl::new();
        access.grant("key", "ch1", "thing-1");

        access.revoke("key", "ch1");

        assert!(access.can_access_by_key("key", "ch1").await.is_err());
    }

    #[tokio::test]
    async fn http_client_refuses_empty_key_without_network() {
        let access = HttpAccessControl::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();

        let err = access.can_access_by_key("", "ch1").await.unwrap_err();

        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn http_client_network_failure_is_upstream() {
        // Port 9 (discard) is not expected to accept HTTP.
        let access = HttpAccessControl::new("http://127.0.0.1:9/", Duration::from_millis(200)).unwrap();

        let err = access.can_access_by_key("key", "ch1").await.unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
    }
}
