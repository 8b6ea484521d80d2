//! Observers - the delivery side of a CoAP observe relation.
//!
//! An [`Observer`] is what the registry stores per `(endpoint, token)`. The
//! production implementation is [`SessionObserver`], which writes
//! notifications into the outbox of a transport [`Session`]. The transport
//! drains the outbox and owns the socket; closing the session (from either
//! side) fires the observer's done signal.

use std::sync::atomic::{AtomicU32, Ordering};

use devicegate_core::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// CoAP content format for `text/plain; charset=utf-8`.
pub const CONTENT_FORMAT_TEXT_PLAIN: u16 = 0;

/// First sequence number used for notifications. 0 and 1 are the register
/// and deregister values of the Observe option.
const FIRST_OBSERVE_SEQ: u32 = 2;

/// Failure of a transport session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session has already ended.
    #[error("session closed")]
    Closed,
    /// The outbox is full; the client is not keeping up.
    #[error("session outbox full")]
    Full,
    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A subscriber to an endpoint.
pub trait Observer: Send + Sync + 'static {
    /// Observe token, unique per client session.
    fn token(&self) -> &str;

    /// Deliver one message. Must not block.
    fn handle(&self, msg: &Message) -> Result<(), SessionError>;

    /// Tear down the underlying session.
    fn cancel(&self) -> Result<(), SessionError>;

    /// Fires once when the session ends, for any reason.
    fn done(&self) -> CancellationToken;
}

/// Notification written to a session outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Observe token the notification answers.
    pub token: String,
    /// Observe option sequence number.
    pub observe: u32,
    /// CoAP content format.
    pub content_format: u16,
    /// Message payload.
    pub payload: Vec<u8>,
}

/// Handle to a client's transport session.
#[derive(Debug, Clone)]
pub struct Session {
    closed: CancellationToken,
    outbox: mpsc::Sender<Notification>,
}

impl Session {
    /// Open a session with an outbox of `capacity` notifications. The
    /// receiver is drained by the transport; dropping it ends the session.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (outbox, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();

        let link = outbox.clone();
        let signal = closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = link.closed() => signal.cancel(),
                () = signal.cancelled() => {}
            }
        });

        (Self { closed, outbox }, rx)
    }

    /// End the session. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbox.is_closed()
    }

    /// Signal fired when the session ends.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn send(&self, notification: Notification) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        self.outbox.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Full,
            mpsc::error::TrySendError::Closed(_) => {
                self.close();
                SessionError::Closed
            }
        })
    }
}

/// [`Observer`] backed by a [`Session`].
#[derive(Debug)]
pub struct SessionObserver {
    token: String,
    session: Session,
    seq: AtomicU32,
}

impl SessionObserver {
    /// Observe `session` under `token`.
    #[must_use]
    pub fn new(token: impl Into<String>, session: Session) -> Self {
        Self {
            token: token.into(),
            session,
            seq: AtomicU32::new(FIRST_OBSERVE_SEQ),
        }
    }
}

impl Observer for SessionObserver {
    fn token(&self) -> &str {
        &self.token
    }

    fn handle(&self, msg: &Message) -> Result<(), SessionError> {
        // Observe sequence numbers are 24 bits on the wire.
        let observe = self.seq.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        self.session.send(Notification {
            token: self.token.clone(),
            observe,
            content_format: CONTENT_FORMAT_TEXT_PLAIN,
            payload: msg.payload.clone(),
        })
    }

    fn cancel(&self) -> Result<(), SessionError> {
        self.session.close();
        Ok(())
    }

    fn done(&self) -> CancellationToken {
        self.session.closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: &[u8]) -> Message {
        Message {
            channel: "ch".to_string(),
            payload: payload.to_vec(),
            ..Message::default()
        }
    }

    #[tokio::test]
    async fn handle_writes_notification_to_outbox() {
        // GIVEN: an observer over a fresh session
        let (session, mut rx) = Session::new(4);
        let observer = SessionObserver::new("tok", session);

        // WHEN: two messages are handled
        observer.handle(&message(b"one")).unwrap();
        observer.handle(&message(b"two")).unwrap();

        // THEN: both arrive in order with increasing sequence numbers
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.token, "tok");
        assert_eq!(first.payload, b"one");
        assert_eq!(first.content_format, CONTENT_FORMAT_TEXT_PLAIN);
        assert_eq!(second.observe, first.observe + 1);
    }

    #[tokio::test]
    async fn full_outbox_does_not_block() {
        let (session, _rx) = Session::new(1);
        let observer = SessionObserver::new("tok", session);

        observer.handle(&message(b"a")).unwrap();

        assert_eq!(observer.handle(&message(b"b")), Err(SessionError::Full));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_fires_done() {
        let (session, _rx) = Session::new(1);
        let observer = SessionObserver::new("tok", session.clone());
        let done = observer.done();

        assert!(observer.cancel().is_ok());
        assert!(observer.cancel().is_ok());
        assert!(done.is_cancelled());
        assert!(session.is_closed());
        assert_eq!(observer.handle(&message(b"x")), Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn dropped_receiver_closes_session() {
        // GIVEN: an observer over a session whose transport goes away
        let (session, rx) = Session::new(1);
        let observer = SessionObserver::new("tok", session.clone());
        let done = observer.done();
        drop(rx);

        // THEN: the done signal fires without anyone calling close
        tokio::time::timeout(std::time::Duration::from_secs(1), done.cancelled())
            .await
            .unwrap();
        assert!(session.is_closed());
        assert_eq!(observer.handle(&message(b"x")), Err(SessionError::Closed));
    }
}
