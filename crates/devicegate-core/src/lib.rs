//! Transport-neutral messaging primitives shared by the devicegate adapters.
//!
//! A [`Message`] is what a device publishes on a channel. Adapters address
//! messages in two ways:
//!
//! - the **endpoint** (`"{channel}.{subtopic}"`), used as the fan-out key for
//!   locally registered observers, and
//! - the **subject** (`"channels.{channel}[.{subtopic}]"`), used on the
//!   publish/subscribe broker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broker subject prefix for channel traffic.
pub const CHANNELS_PREFIX: &str = "channels";

/// A message published by a thing on a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Channel ID the message is published to.
    pub channel: String,
    /// Optional dot-separated subtopic (empty means none).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtopic: String,
    /// Thing ID of the publisher, stamped by the adapter after authorization.
    #[serde(default)]
    pub publisher: String,
    /// Protocol the message arrived over (e.g. `"coap"`).
    #[serde(default)]
    pub protocol: String,
    /// Raw payload.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Creation time in Unix nanoseconds.
    #[serde(default)]
    pub created: i64,
}

impl Message {
    /// Observer fan-out key for this message.
    #[must_use]
    pub fn endpoint(&self) -> String {
        endpoint(&self.channel, &self.subtopic)
    }

    /// Broker subject for this message.
    #[must_use]
    pub fn subject(&self) -> String {
        subject(&self.channel, &self.subtopic)
    }

    /// Serialize to the JSON form carried on the broker.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Observer fan-out key: `"{channel}.{subtopic}"`. The subtopic may be empty,
/// in which case the key ends with a trailing dot.
#[must_use]
pub fn endpoint(channel: &str, subtopic: &str) -> String {
    format!("{channel}.{subtopic}")
}

/// Broker subject: `"channels.{channel}"` with `".{subtopic}"` appended when
/// the subtopic is non-empty.
#[must_use]
pub fn subject(channel: &str, subtopic: &str) -> String {
    if subtopic.is_empty() {
        format!("{CHANNELS_PREFIX}.{channel}")
    } else {
        format!("{CHANNELS_PREFIX}.{channel}.{subtopic}")
    }
}

/// Reasons a raw subtopic path cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtopicError {
    /// The path contains an empty segment (e.g. `a//b`).
    EmptySegment,
    /// The path contains a broker wildcard (`*` or `>`).
    Wildcard,
}

impl fmt::Display for SubtopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySegment => f.write_str("subtopic contains an empty segment"),
            Self::Wildcard => f.write_str("subtopic contains a wildcard"),
        }
    }
}

impl std::error::Error for SubtopicError {}

/// Normalize a slash-separated subtopic path into its dotted form.
///
/// `"/temp/room1"` becomes `"temp.room1"`; an empty or `"/"` path yields an
/// empty subtopic. Wildcards are rejected so that a publisher cannot address
/// more than one subject.
pub fn normalize_subtopic(path: &str) -> Result<String, SubtopicError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let mut parts = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(SubtopicError::EmptySegment);
        }
        if segment.contains('*') || segment.contains('>') {
            return Err(SubtopicError::Wildcard);
        }
        parts.push(segment);
    }

    Ok(parts.join("."))
}
