//! CoAP adapter - observe subscriptions and publishing on channels.
//!
//! Every operation first asks [`AccessControl`] whether the presented thing
//! key may use the channel. Authorization always happens before the
//! registry lock is taken, and no I/O happens while it is held.
//!
//! Published messages are delivered to the observers registered on the
//! message's endpoint, then forwarded to the [`Broker`]. Delivery to one
//! observer failing (slow or gone client) does not affect the others or the
//! publish result.

pub mod access;
pub mod broker;
pub mod handler;
pub mod observer;
pub mod registry;

use std::sync::Arc;

use chrono::Utc;
use devicegate_core::{Message, endpoint};
use tracing::{debug, warn};

use crate::error::DenyReason;
use crate::{Error, Result};

pub use access::{AccessControl, HttpAccessControl, StaticAccessControl};
pub use broker::{Broker, InProcessBroker, Published};
pub use handler::{CoapCode, CoapHandler, CoapRequest, CoapResponse, Method, response_code_for};
pub use observer::{Notification, Observer, Session, SessionError, SessionObserver};
pub use registry::ObserverRegistry;

/// Protocol name stamped on messages received over CoAP.
pub const PROTOCOL: &str = "coap";

/// The CoAP adapter service.
pub struct CoapService {
    access: Arc<dyn AccessControl>,
    broker: Arc<dyn Broker>,
    registry: Arc<ObserverRegistry>,
}

impl CoapService {
    /// Create a service with an empty observer registry.
    #[must_use]
    pub fn new(access: Arc<dyn AccessControl>, broker: Arc<dyn Broker>) -> Self {
        Self {
            access,
            broker,
            registry: Arc::new(ObserverRegistry::new()),
        }
    }

    /// The live observer registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ObserverRegistry> {
        &self.registry
    }

    /// Register `observer` on `chan_id`/`subtopic`.
    ///
    /// The observer is removed automatically when its session ends. If the
    /// same token was already observing the endpoint, the old session is
    /// cancelled; a failure to do so is returned, but the new observer is
    /// registered regardless.
    pub async fn subscribe(
        &self,
        key: &str,
        chan_id: &str,
        subtopic: &str,
        observer: Arc<dyn Observer>,
    ) -> Result<()> {
        self.authorize(key, chan_id)
            .await
            .map_err(|e| e.during("subscribe"))?;

        let endpoint = endpoint(chan_id, subtopic);
        let token = observer.token().to_string();
        let result = self.registry.put(&endpoint, &token, Arc::clone(&observer));
        self.registry.watch(endpoint, observer);
        debug!(channel = %chan_id, subtopic = %subtopic, token = %token, "Observer subscribed");
        result
    }

    /// Stop the observe relation `token` on `chan_id`/`subtopic`.
    pub async fn unsubscribe(
        &self,
        key: &str,
        chan_id: &str,
        subtopic: &str,
        token: &str,
    ) -> Result<()> {
        self.authorize(key, chan_id)
            .await
            .map_err(|e| e.during("unsubscribe"))?;

        self.registry.remove(&endpoint(chan_id, subtopic), token)
    }

    /// Publish `msg` on its channel as the thing behind `key`.
    pub async fn publish(&self, key: &str, mut msg: Message) -> Result<()> {
        let thing_id = self
            .authorize(key, &msg.channel)
            .await
            .map_err(|e| e.during("publish"))?;

        msg.publisher = thing_id;
        if msg.protocol.is_empty() {
            msg.protocol = PROTOCOL.to_string();
        }
        if msg.created == 0 {
            msg.created = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        }

        let endpoint = msg.endpoint();
        for observer in self.registry.observers(&endpoint) {
            if let Err(e) = observer.handle(&msg) {
                warn!(endpoint = %endpoint, token = %observer.token(), error = %e, "Failed to deliver to observer");
            }
        }

        self.broker
            .publish(&msg.subject(), &msg)
            .await
            .map_err(|e| e.during("publish"))
    }

    async fn authorize(&self, key: &str, chan_id: &str) -> Result<String> {
        self.access.can_access_by_key(key, chan_id).await.map_err(|e| {
            debug!(channel = %chan_id, error = %e, "Channel access check failed");
            if e.is_unauthorized() {
                e
            } else {
                Error::Denied {
                    reason: DenyReason::AccessDenied,
                    cause: Box::new(e),
                }
            }
        })
    }
}
