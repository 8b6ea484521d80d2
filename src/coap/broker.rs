//! Publish/subscribe broker the adapter forwards published messages to.

use async_trait::async_trait;
use devicegate_core::Message;
use tokio::sync::broadcast;
use tracing::trace;

use crate::Result;

/// Outbound message bus.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish `msg` on `subject`.
    async fn publish(&self, subject: &str, msg: &Message) -> Result<()>;
}

/// A message as seen by in-process broker subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Broker subject.
    pub subject: String,
    /// The message.
    pub message: Message,
}

/// [`Broker`] that fans messages out to in-process subscribers over a
/// `broadcast` channel. Publishing with no subscribers succeeds.
#[derive(Debug, Clone)]
pub struct InProcessBroker {
    tx: broadcast::Sender<Published>,
}

impl InProcessBroker {
    /// Create a broker whose subscribers can lag by up to `capacity`
    /// messages before dropping.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive everything published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, subject: &str, msg: &Message) -> Result<()> {
        let receivers = self
            .tx
            .send(Published {
                subject: subject.to_string(),
                message: msg.clone(),
            })
            .unwrap_or(0);
        trace!(subject = %subject, receivers, "Published to broker");
        Ok(())
    }
}
