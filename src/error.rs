//! Error types for devicegate

use std::io;

use thiserror::Error;

/// Result type alias for devicegate
pub type Result<T> = std::result::Result<T, Error>;

/// Why a credential was rejected.
///
/// Internal only: it is logged and audited, but every variant surfaces to
/// callers as the same [`Error::Unauthorized`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Token is not a well-formed signed token.
    MalformedToken,
    /// Signature does not match the service secret.
    BadSignature,
    /// Token was signed with a non-HMAC algorithm.
    WrongAlgorithm,
    /// Self-contained expiry has passed.
    Expired,
    /// A claim required for the token type is empty.
    MissingClaim,
    /// Token type is unset or not allowed for the operation.
    WrongKeyType,
    /// Persisted key has passed its expiry and was revoked.
    KeyExpired,
    /// The access-control service refused the key.
    AccessDenied,
}

impl DenyReason {
    /// Stable string used in audit events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::BadSignature => "bad_signature",
            Self::WrongAlgorithm => "wrong_algorithm",
            Self::Expired => "expired",
            Self::MissingClaim => "missing_claim",
            Self::WrongKeyType => "wrong_key_type",
            Self::KeyExpired => "key_expired",
            Self::AccessDenied => "access_denied",
        }
    }
}

/// Coarse error taxonomy exposed to transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Any credential problem.
    Unauthorized,
    /// `issued_at` was zero-valued at issuance.
    InvalidIssuedAt,
    /// Structurally invalid request.
    MalformedEntity,
    /// Repository miss.
    NotFound,
    /// Duplicate key ID on persist.
    Conflict,
    /// Transport-session cancellation failed.
    Unsubscribe,
    /// Failure of an external collaborator.
    Upstream,
    /// Invalid configuration.
    Config,
    /// Anything else.
    Internal,
}

/// devicegate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Credential rejected. The reason is never part of the message.
    #[error("unauthorized access")]
    Unauthorized(DenyReason),

    /// Credential rejected because a collaborator failed. Same message as
    /// [`Error::Unauthorized`]; the failure stays reachable via `source()`.
    #[error("unauthorized access")]
    Denied {
        /// Why the credential was rejected
        reason: DenyReason,
        /// The collaborator failure
        #[source]
        cause: Box<Error>,
    },

    /// Key issued with a zero-valued timestamp
    #[error("invalid key issue time")]
    InvalidKeyIssuedAt,

    /// Malformed entity specification
    #[error("malformed entity specification: {0}")]
    MalformedEntity(String),

    /// Entity not found
    #[error("entity not found")]
    NotFound,

    /// Entity already exists
    #[error("entity already exists")]
    Conflict,

    /// Cancelling an observer's transport session failed
    #[error("unable to unsubscribe: {0}")]
    Unsubscribe(#[source] crate::coap::SessionError),

    /// Error from an external collaborator (repository, ID provider,
    /// access control, broker)
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Operation context around an underlying error
    #[error("{op}: {source}")]
    Operation {
        /// The operation that failed
        op: &'static str,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap `self` with the name of the operation that failed.
    #[must_use]
    pub fn during(self, op: &'static str) -> Self {
        Self::Operation {
            op,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through operation context.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Taxonomy of this error, looking through operation context.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Unauthorized(_) | Self::Denied { .. } => ErrorKind::Unauthorized,
            Self::InvalidKeyIssuedAt => ErrorKind::InvalidIssuedAt,
            Self::MalformedEntity(_) => ErrorKind::MalformedEntity,
            Self::NotFound => ErrorKind::NotFound,
            Self::Conflict => ErrorKind::Conflict,
            Self::Unsubscribe(_) => ErrorKind::Unsubscribe,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) | Self::Internal(_) | Self::Operation { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// The internal deny reason, if this is a credential rejection.
    #[must_use]
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self.root() {
            Self::Unauthorized(reason) | Self::Denied { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether this is a credential rejection.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }
}
