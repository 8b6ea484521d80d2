//! CoAP request mapping.
//!
//! Translates decoded CoAP requests into [`CoapService`] calls and service
//! results into CoAP response codes. The wire codec is the transport's job;
//! this layer only sees the fields it needs.
//!
//! | Request | Operation | Success |
//! |---------|-----------|---------|
//! | `GET`, Observe `0` | subscribe | `2.05 Content` |
//! | `GET`, Observe `1` | unsubscribe | `2.02 Deleted` |
//! | `POST` | publish | `2.01 Created` |
//!
//! Resources live at `/channels/{id}/messages[/{subtopic...}]` and the thing
//! key travels in the `auth` query parameter.

use std::fmt;
use std::sync::{Arc, OnceLock};

use devicegate_core::{Message, normalize_subtopic};
use regex::Regex;
use tracing::{debug, error};

use super::CoapService;
use super::observer::{Session, SessionObserver};
use crate::Error;
use crate::error::ErrorKind;

/// Observe option value registering an observer.
pub const OBSERVE_REGISTER: u32 = 0;
/// Observe option value deregistering an observer.
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Request method codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// 0.01
    Get,
    /// 0.02
    Post,
    /// 0.03
    Put,
    /// 0.04
    Delete,
}

/// Response codes the adapter produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapCode {
    /// 2.01
    Created,
    /// 2.02
    Deleted,
    /// 2.05
    Content,
    /// 4.00
    BadRequest,
    /// 4.01
    Unauthorized,
    /// 4.03
    Forbidden,
    /// 4.05
    MethodNotAllowed,
    /// 5.00
    InternalServerError,
}

impl CoapCode {
    /// Dotted `class.detail` form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "2.01",
            Self::Deleted => "2.02",
            Self::Content => "2.05",
            Self::BadRequest => "4.00",
            Self::Unauthorized => "4.01",
            Self::Forbidden => "4.03",
            Self::MethodNotAllowed => "4.05",
            Self::InternalServerError => "5.00",
        }
    }

    /// Returns `true` for 2.xx codes.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Deleted | Self::Content)
    }
}

impl fmt::Display for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound request.
#[derive(Debug, Clone)]
pub struct CoapRequest {
    /// Method code.
    pub code: Method,
    /// Uri-Path options joined with `/`.
    pub path: String,
    /// Uri-Query options joined with `&`.
    pub query: String,
    /// Request token.
    pub token: String,
    /// Observe option, if present.
    pub observe: Option<u32>,
    /// Request body.
    pub payload: Vec<u8>,
}

/// Response to send back on the request's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapResponse {
    /// Response code.
    pub code: CoapCode,
    /// Request token echoed back.
    pub token: String,
}

/// `(channel id, dotted subtopic)` parsed from a request path.
fn parse_path(path: &str) -> Option<(String, String)> {
    static PATH_RE: OnceLock<Regex> = OnceLock::new();
    let re = PATH_RE.get_or_init(|| {
        Regex::new(r"^/?channels/([\w\-]+)/messages(/[^?]*)?$").expect("static regex")
    });

    let caps = re.captures(path)?;
    let channel = caps.get(1)?.as_str().to_string();
    let subtopic = normalize_subtopic(caps.get(2).map_or("", |m| m.as_str())).ok()?;
    Some((channel, subtopic))
}

/// Value of the `auth` query parameter.
fn auth_key(query: &str) -> Option<&str> {
    query
        .trim_start_matches('?')
        .split('&')
        .find_map(|pair| pair.strip_prefix("auth="))
        .filter(|key| !key.is_empty())
}

/// CoAP response code for a service error.
#[must_use]
pub fn response_code_for(err: &Error) -> CoapCode {
    match err.kind() {
        ErrorKind::Unauthorized => CoapCode::Forbidden,
        ErrorKind::MalformedEntity | ErrorKind::InvalidIssuedAt => CoapCode::BadRequest,
        _ => CoapCode::InternalServerError,
    }
}

/// Dispatches [`CoapRequest`]s to a [`CoapService`].
#[derive(Clone)]
pub struct CoapHandler {
    service: Arc<CoapService>,
}

impl CoapHandler {
    /// Create a handler over `service`.
    #[must_use]
    pub fn new(service: Arc<CoapService>) -> Self {
        Self { service }
    }

    /// Handle one request arriving on `session`. Observe registrations
    /// deliver their notifications into that session's outbox.
    pub async fn handle(&self, req: CoapRequest, session: &Session) -> CoapResponse {
        let code = self.dispatch(&req, session).await;
        CoapResponse {
            code,
            token: req.token,
        }
    }

    async fn dispatch(&self, req: &CoapRequest, session: &Session) -> CoapCode {
        if !matches!(req.code, Method::Get | Method::Post) {
            return CoapCode::MethodNotAllowed;
        }

        let Some((channel, subtopic)) = parse_path(&req.path) else {
            debug!(path = %req.path, "Invalid CoAP resource path");
            return CoapCode::BadRequest;
        };
        let Some(key) = auth_key(&req.query) else {
            return CoapCode::Unauthorized;
        };

        let (result, success) = match (req.code, req.observe) {
            (Method::Get, Some(OBSERVE_REGISTER)) => {
                let observer = Arc::new(SessionObserver::new(req.token.clone(), session.clone()));
                (
                    self.service.subscribe(key, &channel, &subtopic, observer).await,
                    CoapCode::Content,
                )
            }
            (Method::Get, Some(OBSERVE_DEREGISTER)) => (
                self.service.unsubscribe(key, &channel, &subtopic, &req.token).await,
                CoapCode::Deleted,
            ),
            (Method::Get, _) => return CoapCode::BadRequest,
            _ => {
                let msg = Message {
                    channel,
                    subtopic,
                    payload: req.payload.clone(),
                    ..Message::default()
                };
                (self.service.publish(key, msg).await, CoapCode::Created)
            }
        };

        match result {
            Ok(()) => success,
            Err(e) => {
                let code = response_code_for(&e);
                if code == CoapCode::InternalServerError {
                    error!(path = %req.path, error = %e, "CoAP request failed");
                } else {
                    debug!(path = %req.path, error = %e, code = %code, "CoAP request rejected");
                }
                code
            }
        }
    }
}
