//! devicegate server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::auth::handler::key_routes;
use crate::auth::{InMemoryKeyRepository, KeyService, UuidIdentityProvider};
use crate::coap::{
    AccessControl, CoapHandler, CoapService, HttpAccessControl, InProcessBroker, Session,
    StaticAccessControl,
};
use crate::config::Config;
use crate::{Error, Result};

/// Wires the key service and CoAP adapter together and serves the HTTP API.
pub struct Server {
    config: Config,
    keys: Arc<KeyService>,
    coap: Arc<CoapService>,
    broker: InProcessBroker,
}

impl Server {
    /// Build all services from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let keys = Arc::new(KeyService::from_config(
            Arc::new(InMemoryKeyRepository::new()),
            Arc::new(UuidIdentityProvider::new()),
            &config.auth,
        )?);

        let access: Arc<dyn AccessControl> = match &config.coap.things_url {
            Some(url) => Arc::new(HttpAccessControl::new(url.clone(), config.coap.access_timeout)?),
            None => {
                warn!("coap.things_url not set - all channel access will be denied");
                Arc::new(StaticAccessControl::new())
            }
        };
        let broker = InProcessBroker::new(config.coap.broker_capacity);
        let coap = Arc::new(CoapService::new(access, Arc::new(broker.clone())));

        Ok(Self {
            config,
            keys,
            coap,
            broker,
        })
    }

    /// The key service.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyService> {
        &self.keys
    }

    /// Request handler for a CoAP transport to drive.
    #[must_use]
    pub fn coap_handler(&self) -> CoapHandler {
        CoapHandler::new(Arc::clone(&self.coap))
    }

    /// Open a client session sized from configuration.
    #[must_use]
    pub fn coap_session(&self) -> (Session, tokio::sync::mpsc::Receiver<crate::coap::Notification>) {
        Session::new(self.config.coap.outbox_capacity)
    }

    /// The broker published messages are forwarded to.
    #[must_use]
    pub fn broker(&self) -> &InProcessBroker {
        &self.broker
    }

    /// HTTP router with tracing, panic and timeout layers.
    pub fn router(&self) -> Router {
        key_routes(Arc::clone(&self.keys))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.config.server.request_timeout,
            ))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            host = %self.config.server.host,
            port = self.config.server.port,
            issuer = %self.keys.issuer_name(),
            "Listening"
        );
        if self.config.auth.secret == "auto" {
            warn!("auth.secret is 'auto' - issued keys will not survive a restart");
        }

        let shutdown_timeout = self.config.server.shutdown_timeout;
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        tokio::select! {
            result = serve => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline(shutdown_timeout) => {
                warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out");
            }
        }

        let observers = self.coap.registry().len();
        if observers > 0 {
            info!(endpoints = observers, "Dropping remaining observers");
        }
        Ok(())
    }
}

/// Resolves `timeout` after the shutdown signal, bounding how long in-flight
/// requests may drain.
async fn drain_deadline(timeout: std::time::Duration) {
    shutdown_signal().await;
    tokio::time::sleep(timeout).await;
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
