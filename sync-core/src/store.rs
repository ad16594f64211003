//! Collaborator interfaces: the CRDT engine and the document store.
//!
//! Sessions depend only on these traits. They never reach into a specific
//! engine's internal representation; clock extraction, change diffing and
//! change application are all engine capabilities.
//!
//! Change notification is modelled as a per-subscription queue owned by the
//! store. A session subscribes on open, drains its queue with
//! [`DocumentStore::take_notifications`], and unsubscribes on close. There is
//! no global notification bus.

use std::fmt;
use thiserror::Error;

use docsync_types::{Change, DocumentId, VectorClock};

/// Errors raised by a CRDT engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A change record could not be decoded.
    #[error("cannot decode change: {0}")]
    Decode(String),

    /// A change record could not be encoded.
    #[error("cannot encode change: {0}")]
    Encode(String),

    /// A change record is structurally invalid.
    #[error("invalid change: {0}")]
    InvalidChange(String),
}

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine rejected the operation.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// The CRDT engine a store delegates to.
///
/// Applying changes must be idempotent, and tolerant of order for changes
/// that are causally ready. The sync protocol performs no deduplication of
/// its own.
pub trait CrdtEngine {
    /// The document representation managed by this engine.
    type Document: Clone;

    /// Extract the document's current clock.
    ///
    /// `None` means the value is not a sync-capable document (for example a
    /// read-only snapshot taken from history).
    fn clock_of(&self, document: &Self::Document) -> Option<VectorClock>;

    /// Changes present in `document` but not implied by `since`, in an
    /// order the receiving engine can apply.
    fn missing_changes(
        &self,
        document: &Self::Document,
        since: &VectorClock,
    ) -> Result<Vec<Change>, EngineError>;

    /// Apply changes, starting from `document` or from an empty document
    /// when the store does not hold one yet.
    fn apply_changes(
        &self,
        document: Option<&Self::Document>,
        changes: &[Change],
    ) -> Result<Self::Document, EngineError>;
}

/// Handle for one change-notification subscription.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Create a SubscriptionId from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Document type of a store's engine.
pub type DocumentOf<S> = <<S as DocumentStore>::Engine as CrdtEngine>::Document;

/// A set of CRDT documents keyed by document id.
pub trait DocumentStore {
    /// Engine used for every document in this store.
    type Engine: CrdtEngine;

    /// The engine.
    fn engine(&self) -> &Self::Engine;

    /// Ids of every document currently held.
    fn document_ids(&self) -> Vec<DocumentId>;

    /// Current value of a document.
    fn document(&self, id: &DocumentId) -> Option<&DocumentOf<Self>>;

    /// Apply changes to a document, creating it if absent.
    ///
    /// Must queue a "document changed" notification for every subscriber.
    fn apply_changes(&mut self, id: &DocumentId, changes: &[Change]) -> Result<(), StoreError>;

    /// Start receiving "document changed" notifications.
    fn subscribe(&mut self) -> SubscriptionId;

    /// Stop receiving notifications. Returns whether the subscription existed.
    fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool;

    /// Drain the ids of documents changed since the last call, in order.
    fn take_notifications(&mut self, subscription: SubscriptionId) -> Vec<DocumentId>;
}
