//! SyncPeer - drives one sync session over a transport.
//!
//! # Architecture
//!
//! [`SyncPeer`] uses the pure session (from sync-core) for protocol logic
//! and performs the I/O it asks for via the [`Transport`] trait.
//!
//! ```text
//! Application → SharedRepo ←── SyncPeer ──→ Transport → Network
//!                                 ↓
//!                      sync-core (pure session)
//! ```
//!
//! Several peers may share one [`SharedRepo`], one per remote replica.
//! Every mutation of the shared store bumps a change signal so that each
//! peer drains its own notifications and pushes to its remote.
//!
//! # Locking
//!
//! The session mutex is taken before the store mutex, and the store mutex is
//! released before anything is sent. The session mutex is held for the
//! whole of an operation, which serializes inbound messages and local
//! change handling for one peer.
//!
//! # Example
//!
//! ```ignore
//! let repo = SharedRepo::new(MemoryRepo::default());
//! let (left, right) = MemoryTransport::pair();
//! let peer = SyncPeer::new(SyncConfig::default(), repo.clone(), left);
//!
//! peer.open().await?;
//! peer.run().await?;
//! ```

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, warn};

use docsync_core::{
    DocumentFailure, DocumentOf, DocumentStore, Received, SessionError, SessionState, SyncSession,
};
use docsync_types::{SyncError, SyncMessage};

use crate::config::SyncConfig;
use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Message could not be encoded or decoded.
    #[error("message error: {0}")]
    Message(#[from] SyncError),

    /// Encoded message exceeds the configured limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

impl ClientError {
    /// Whether the peer can keep running after this error.
    ///
    /// Bad input and per-document failures are recoverable; transport
    /// failures and lifecycle misuse are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Message(_) | Self::MessageTooLarge { .. } => true,
            Self::Session(e) => !matches!(e, SessionError::Closed | SessionError::AlreadyOpened),
            Self::Transport(_) => false,
        }
    }
}

/// A document store shared between several peers.
///
/// Clones share the same store.
pub struct SharedRepo<S> {
    store: Arc<Mutex<S>>,
    changed: Arc<watch::Sender<u64>>,
}

impl<S> Clone for SharedRepo<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            changed: Arc::clone(&self.changed),
        }
    }
}

impl<S: DocumentStore> SharedRepo<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            store: Arc::new(Mutex::new(store)),
            changed: Arc::new(changed),
        }
    }

    /// Run a local mutation and wake every peer.
    pub async fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = {
            let mut store = self.store.lock().await;
            f(&mut *store)
        };
        self.notify();
        result
    }

    /// Read the store.
    pub async fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let store = self.store.lock().await;
        f(&*store)
    }

    /// Wake every peer sharing this store.
    pub fn notify(&self) {
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Number of change signals so far.
    pub fn generation(&self) -> u64 {
        *self.changed.borrow()
    }

    /// Subscribe to change signals.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, S> {
        self.store.lock().await
    }
}

/// Syncs a shared store with one remote peer.
pub struct SyncPeer<S, T> {
    config: SyncConfig,
    repo: SharedRepo<S>,
    transport: T,
    session: Mutex<SyncSession>,
}

impl<S, T> SyncPeer<S, T>
where
    S: DocumentStore + Send,
    T: Transport,
{
    /// Create a peer. Nothing is sent until [`open`](Self::open).
    pub fn new(config: SyncConfig, repo: SharedRepo<S>, transport: T) -> Self {
        let session = SyncSession::new(config.peer_name.clone())
            .with_outbound_limit(config.codec, config.max_message_size);
        Self {
            config,
            repo,
            transport,
            session: Mutex::new(session),
        }
    }

    /// Advertise every document and start tracking local changes.
    ///
    /// Returns the documents that could not be advertised.
    pub async fn open(&self) -> Result<Vec<DocumentFailure>, ClientError> {
        let mut session = self.session.lock().await;
        let outcome = {
            let mut store = self.repo.lock().await;
            session.open(&mut *store)?
        };
        debug!(peer = %self.config.peer_name, messages = outcome.messages.len(), "opened");

        self.report(&outcome.failures);
        self.send_all(&mut session, &outcome.messages).await?;
        Ok(outcome.failures)
    }

    /// Handle one encoded inbound message.
    ///
    /// Oversized or malformed input is rejected before any state changes.
    /// Returns the current value of the message's document, if held.
    pub async fn receive(&self, bytes: &[u8]) -> Result<Option<DocumentOf<S>>, ClientError> {
        if bytes.len() > self.config.max_message_size {
            warn!(peer = %self.config.peer_name, size = bytes.len(), "inbound message too large");
            return Err(ClientError::MessageTooLarge {
                size: bytes.len(),
                max: self.config.max_message_size,
            });
        }
        let message = self.config.codec.decode(bytes).map_err(|e| {
            warn!(peer = %self.config.peer_name, error = %e, "malformed message");
            e
        })?;
        let applies = !message.changes().is_empty();

        let mut session = self.session.lock().await;
        let (received, outcome) = {
            let mut store = self.repo.lock().await;
            let received = session.receive(&mut *store, message)?;
            let outcome = session.process_notifications(&mut *store);
            (received, outcome)
        };
        if applies {
            self.repo.notify();
        }

        self.report(&outcome.failures);
        let Received {
            mut messages,
            document,
        } = received;
        messages.extend(outcome.messages);
        self.send_all(&mut session, &messages).await?;
        Ok(document)
    }

    /// React to local changes made since the last call.
    ///
    /// Returns the documents that were skipped.
    pub async fn flush(&self) -> Result<Vec<DocumentFailure>, ClientError> {
        let mut session = self.session.lock().await;
        let outcome = {
            let mut store = self.repo.lock().await;
            session.process_notifications(&mut *store)
        };

        self.report(&outcome.failures);
        self.send_all(&mut session, &outcome.messages).await?;
        Ok(outcome.failures)
    }

    /// Close the session and the transport. Idempotent.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        if session.state() != SessionState::Closed {
            let mut store = self.repo.lock().await;
            session.close(&mut *store);
            debug!(peer = %self.config.peer_name, "closed");
        }
        self.transport.close().await?;
        Ok(())
    }

    /// Process inbound messages and local changes until the transport
    /// closes, then close the peer.
    ///
    /// Call [`open`](Self::open) first. Recoverable errors are logged and
    /// skipped. The peer is closed however the loop ends.
    pub async fn run(&self) -> Result<(), ClientError> {
        let result = self.serve().await;
        let closed = self.close().await;
        result.and(closed)
    }

    async fn serve(&self) -> Result<(), ClientError> {
        let mut changed = self.repo.subscribe();
        if let Err(e) = self.flush().await {
            self.skip_recoverable(e, "local changes not flushed")?;
        }

        loop {
            tokio::select! {
                inbound = self.transport.recv() => match inbound {
                    Ok(bytes) => match self.receive(&bytes).await {
                        Ok(_) => {}
                        // closed locally while the message was in flight
                        Err(ClientError::Session(SessionError::Closed)) => return Ok(()),
                        Err(e) => self.skip_recoverable(e, "dropped inbound message")?,
                    },
                    Err(TransportError::ConnectionClosed) => {
                        debug!(peer = %self.config.peer_name, "connection closed");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                },
                signal = changed.changed() => {
                    if signal.is_err() {
                        return Ok(());
                    }
                    if let Err(e) = self.flush().await {
                        self.skip_recoverable(e, "local changes not flushed")?;
                    }
                }
            }
        }
    }

    fn skip_recoverable(&self, error: ClientError, what: &str) -> Result<(), ClientError> {
        if !error.is_recoverable() {
            return Err(error);
        }
        warn!(peer = %self.config.peer_name, error = %error, "{}", what);
        Ok(())
    }

    /// Whether the session is open.
    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_open()
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the shared store.
    pub fn repo(&self) -> &SharedRepo<S> {
        &self.repo
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send messages in order.
    ///
    /// Pushes were size-checked by the session before it recorded them as
    /// sent, so anything else that does not fit is dropped and the rest of
    /// the batch still goes out. A transport failure closes the session:
    /// pushes it recorded as sent may never have arrived.
    async fn send_all(
        &self,
        session: &mut SyncSession,
        messages: &[SyncMessage],
    ) -> Result<(), ClientError> {
        for message in messages {
            let bytes = match self.config.codec.encode(message) {
                Ok(bytes) if bytes.len() <= self.config.max_message_size => bytes,
                Ok(bytes) => {
                    warn!(
                        peer = %self.config.peer_name,
                        document = %message.document_id,
                        size = bytes.len(),
                        "outbound message too large"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(peer = %self.config.peer_name, document = %message.document_id, error = %e, "cannot encode message");
                    continue;
                }
            };
            if let Err(e) = self.transport.send(&bytes).await {
                warn!(peer = %self.config.peer_name, error = %e, "send failed; closing session");
                let mut store = self.repo.lock().await;
                session.close(&mut *store);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn report(&self, failures: &[DocumentFailure]) {
        for failure in failures {
            warn!(
                peer = %self.config.peer_name,
                document = %failure.document_id,
                error = %failure.error,
                "document skipped"
            );
        }
    }
}
