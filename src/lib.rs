//! devicegate
//!
//! Authentication core and CoAP observer registry for an IoT messaging
//! platform.
//!
//! # Features
//!
//! - **Key service**: login, reset and user keys as HMAC-signed tokens, with
//!   persisted user keys acting as the revocation list
//! - **CoAP adapter**: observe subscriptions per channel and subtopic,
//!   publish fan-out to observers and a pub/sub broker
//! - **HTTP API**: key issuance, retrieval, revocation and identification
//! - **Audit trail**: structured log events for every key lifecycle step

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod coap;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
