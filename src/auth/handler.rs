//! HTTP handlers for the key service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/keys` | Issue a user (default) or reset key |
//! | `GET` | `/keys/{id}` | Fetch a user key record |
//! | `DELETE` | `/keys/{id}` | Revoke a user key |
//! | `POST` | `/identify` | Resolve a token to its identity |
//! | `GET` | `/health` | Liveness check |
//!
//! Key endpoints take the caller's login key in `Authorization`, with or
//! without a `Bearer ` prefix. Login keys themselves are not issued here:
//! they come from the primary login flow (see the `login` CLI command).

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::{KeyService, KeyType, issue_time};
use crate::Error;
use crate::error::ErrorKind;

// ── Request / Response types ───────────────────────────────────────────────

/// `POST /keys` body.
#[derive(Debug, Default, Deserialize)]
pub struct IssueKeyRequest {
    /// Numeric key type: `1` reset, `2` user. Defaults to user.
    #[serde(rename = "type", default)]
    pub key_type: Option<u32>,
    /// Lifetime of a user key in seconds. Absent means no expiry.
    #[serde(default)]
    pub duration: Option<u64>,
}

/// `POST /keys` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueKeyResponse {
    /// Key ID, empty for reset keys.
    pub id: String,
    /// The signed token.
    pub value: String,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// Expiry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// `POST /identify` body.
#[derive(Debug, Deserialize)]
pub struct IdentifyRequest {
    /// Token to resolve.
    pub token: String,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the key service routes.
pub fn key_routes(service: Arc<KeyService>) -> Router {
    Router::new()
        .route("/keys", post(issue_key))
        .route("/keys/{id}", get(retrieve_key).delete(revoke_key))
        .route("/identify", post(identify))
        .route("/health", get(health))
        .with_state(service)
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// Credential from the `Authorization` header, `Bearer ` prefix stripped.
/// A missing header yields an empty token, which the service rejects.
fn bearer(headers: &HeaderMap) -> &str {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim();
    value.strip_prefix("Bearer ").unwrap_or(value)
}

/// `POST /keys`
async fn issue_key(
    State(service): State<Arc<KeyService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // An empty body means all defaults.
    let body: IssueKeyRequest = if body.is_empty() {
        IssueKeyRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, "malformed_entity", &e.to_string());
            }
        }
    };

    let key_type = match body.key_type.map_or(Ok(KeyType::User), KeyType::try_from) {
        Ok(KeyType::Login) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "malformed_entity",
                "login keys are not issued over HTTP",
            );
        }
        Ok(kt) => kt,
        Err(e) => return into_error_response(&e),
    };

    let mut key = super::Key::new(key_type);
    key.issued_at = issue_time();
    if key_type == KeyType::User {
        if let Some(secs) = body.duration {
            let expires_at = i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|ttl| key.issued_at.checked_add_signed(ttl));
            let Some(expires_at) = expires_at else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "malformed_entity",
                    "duration out of range",
                );
            };
            key.expires_at = Some(expires_at);
        }
    }

    match service.issue(bearer(&headers), key).await {
        Ok(key) => (
            StatusCode::CREATED,
            Json(IssueKeyResponse {
                id: key.id,
                value: key.secret,
                issued_at: key.issued_at,
                expires_at: key.expires_at,
            }),
        )
            .into_response(),
        Err(e) => into_error_response(&e),
    }
}

/// `GET /keys/{id}`
async fn retrieve_key(
    State(service): State<Arc<KeyService>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    match service.retrieve(bearer(&headers), &id).await {
        Ok(mut key) => {
            // The stored digest stays server-side.
            key.secret.clear();
            Json(key).into_response()
        }
        Err(e) => into_error_response(&e),
    }
}

/// `DELETE /keys/{id}`
async fn revoke_key(
    State(service): State<Arc<KeyService>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    match service.revoke(bearer(&headers), &id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => into_error_response(&e),
    }
}

/// `POST /identify`
async fn identify(
    State(service): State<Arc<KeyService>>,
    Json(body): Json<IdentifyRequest>,
) -> Response {
    match service.identify(&body.token).await {
        Ok(identity) => Json(json!({ "identity": identity })).into_response(),
        Err(e) => into_error_response(&e),
    }
}

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ── Error mapping ─────────────────────────────────────────────────────────

/// HTTP status for a service error.
#[must_use]
pub fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::MalformedEntity | ErrorKind::InvalidIssuedAt => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unsubscribe | ErrorKind::Upstream | ErrorKind::Config | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn into_error_response(err: &Error) -> Response {
    let status = status_for(err);
    let code = match err.kind() {
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::MalformedEntity | ErrorKind::InvalidIssuedAt => "malformed_entity",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Conflict => "conflict",
        _ => "internal_error",
    };

    if status.is_server_error() {
        error!(error = %err, "Key service request failed");
        return error_response(status, code, "internal error");
    }

    debug!(error = %err, status = %status, "Key service request rejected");
    // Root message only: operation context is for logs.
    error_response(status, code, &err.root().to_string())
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error": error, "message": message})),
    )
        .into_response()
}
