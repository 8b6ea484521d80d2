//! Shared test doubles.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use devicegate::Result;
use devicegate::auth::{IdentityProvider, InMemoryKeyRepository, Key, KeyRepository};
use devicegate::coap::{Observer, SessionError};
use devicegate_core::Message;
use tokio_util::sync::CancellationToken;

/// Repository that counts every call before delegating to an in-memory store.
#[derive(Debug, Default)]
pub struct CountingRepository {
    inner: InMemoryKeyRepository,
    pub calls: AtomicUsize,
}

impl CountingRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait::async_trait]
impl KeyRepository for CountingRepository {
    async fn save(&self, key: Key) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key).await
    }

    async fn retrieve(&self, issuer: &str, id: &str) -> Result<Key> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(issuer, id).await
    }

    async fn remove(&self, issuer: &str, id: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(issuer, id).await
    }
}

/// Identity provider that always hands out the same ID.
#[derive(Debug)]
pub struct FixedIdentityProvider(pub &'static str);

impl IdentityProvider for FixedIdentityProvider {
    fn id(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Observer recording every call.
#[derive(Debug)]
pub struct RecordingObserver {
    token: String,
    done: CancellationToken,
    pub handled: AtomicUsize,
    pub cancels: AtomicUsize,
    fail_handle: bool,
}

impl RecordingObserver {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            done: CancellationToken::new(),
            handled: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            fail_handle: false,
        })
    }

    /// An observer whose deliveries always fail.
    pub fn broken(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            done: CancellationToken::new(),
            handled: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            fail_handle: true,
        })
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Simulate the client session ending.
    pub fn end_session(&self) {
        self.done.cancel();
    }
}

impl Observer for RecordingObserver {
    fn token(&self) -> &str {
        &self.token
    }

    fn handle(&self, _msg: &Message) -> std::result::Result<(), SessionError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if self.fail_handle {
            return Err(SessionError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    fn cancel(&self) -> std::result::Result<(), SessionError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.done.cancel();
        Ok(())
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }
}

/// Poll `cond` for up to one second.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    cond()
}
