//! HTTP API tests
//!
//! Drives the key service router in-process with `tower::ServiceExt`.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use devicegate::auth::handler::{IssueKeyResponse, key_routes};
use devicegate::auth::{InMemoryKeyRepository, Key, KeyService, KeyType, UuidIdentityProvider, issue_time};
use devicegate::config::{AuthConfig, Config};
use devicegate::server::Server;
use serde_json::{Value, json};
use tower::ServiceExt;

const EMAIL: &str = "owner@example.com";

async fn setup() -> (Router, String) {
    let svc = Arc::new(KeyService::new(
        Arc::new(InMemoryKeyRepository::new()),
        Arc::new(UuidIdentityProvider::new()),
        "http-secret",
    ));
    let mut req = Key::new(KeyType::Login);
    req.issued_at = issue_time();
    let login = svc.issue(EMAIL, req).await.unwrap();
    (key_routes(svc), login.secret)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, auth: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = auth {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn with_auth(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// Issue, fetch, revoke and re-fetch a user key over HTTP
#[tokio::test]
async fn test_user_key_lifecycle_over_http() {
    let (app, login) = setup().await;

    // Issue (type defaults to user)
    let (status, body) = send(&app, post_json("/keys", Some(&login), &json!({"duration": 3600}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let issued: IssueKeyResponse = serde_json::from_value(body).unwrap();
    assert!(!issued.id.is_empty());
    assert!(issued.expires_at.is_some());

    // Identify with the new key
    let (status, body) = send(&app, post_json("/identify", None, &json!({"token": issued.value}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity"], EMAIL);

    // Fetch: no secret material in the response
    let (status, body) = send(&app, with_auth("GET", &format!("/keys/{}", issued.id), &login)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], issued.id.as_str());
    assert_eq!(body["type"], "user");
    assert!(body.get("secret").is_none());

    // Revoke twice
    for _ in 0..2 {
        let (status, _) = send(&app, with_auth("DELETE", &format!("/keys/{}", issued.id), &login)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    // Gone
    let (status, _) = send(&app, with_auth("GET", &format!("/keys/{}", issued.id), &login)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Reset keys can be requested with type 1
#[tokio::test]
async fn test_issue_reset_key() {
    let (app, login) = setup().await;

    let (status, body) = send(&app, post_json("/keys", Some(&login), &json!({"type": 1}))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "");
    assert!(body["expires_at"].is_string());
}

/// Bad requests map to the documented status codes
#[tokio::test]
async fn test_error_statuses() {
    let (app, login) = setup().await;

    let cases = [
        (post_json("/keys", Some(&login), &json!({"type": 0})), StatusCode::BAD_REQUEST),
        (post_json("/keys", Some(&login), &json!({"type": 7})), StatusCode::BAD_REQUEST),
        (
            post_json("/keys", Some(&login), &json!({"type": 2, "duration": i64::MAX})),
            StatusCode::BAD_REQUEST,
        ),
        (
            post_json("/keys", Some(&login), &json!({"duration": u64::MAX})),
            StatusCode::BAD_REQUEST,
        ),
        (post_json("/keys", None, &json!({})), StatusCode::FORBIDDEN),
        (post_json("/keys", Some("garbage"), &json!({})), StatusCode::FORBIDDEN),
        (post_json("/identify", None, &json!({"token": "garbage"})), StatusCode::FORBIDDEN),
        (with_auth("GET", "/keys/unknown", &login), StatusCode::NOT_FOUND),
    ];

    for (req, expected) in cases {
        let uri = req.uri().to_string();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, expected, "{uri}");
    }
}

/// Unauthorized responses do not reveal why
#[tokio::test]
async fn test_unauthorized_body_is_generic() {
    let (app, _) = setup().await;

    let (_, garbage) = send(&app, post_json("/identify", None, &json!({"token": "garbage"}))).await;
    let (_, empty) = send(&app, post_json("/identify", None, &json!({"token": ""}))).await;

    assert_eq!(garbage, empty);
    assert_eq!(garbage["message"], "unauthorized access");
}

/// The assembled server exposes health behind its middleware stack
#[tokio::test]
async fn test_server_router_health() {
    let config = Config {
        auth: AuthConfig {
            secret: "server-secret".to_string(),
            ..AuthConfig::default()
        },
        ..Config::default()
    };
    let server = Server::new(config).unwrap();

    let (status, body) = send(
        &server.router(),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

/// An empty body issues a non-expiring user key
#[tokio::test]
async fn test_issue_with_empty_body() {
    let (app, login) = setup().await;

    let (status, body) = send(&app, with_auth("POST", "/keys", &login)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body.get("expires_at").is_none());
    assert!(!body["id"].as_str().unwrap().is_empty());
}

/// Durations too large to represent are refused, not accepted or crashed on
#[tokio::test]
async fn test_issue_with_oversized_duration() {
    let (app, login) = setup().await;

    let (status, body) = send(
        &app,
        post_json("/keys", Some(&login), &json!({"type": 2, "duration": 9_223_372_036_854_775_807_i64})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed_entity");
}
