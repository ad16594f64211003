//! Per-peer sync session.
//!
//! One [`SyncSession`] keeps the documents of a local store in sync with one
//! remote peer. It never sends anything itself: each operation returns the
//! [`SyncMessage`]s to hand to the transport, and the caller passes the store
//! in explicitly. Each call runs to completion, so inbound messages and
//! change notifications are serialized by construction.
//!
//! ## Protocol
//!
//! - A changes-less message carrying a clock is a request: "this is what I
//!   have, send me anything newer". With the empty clock it doubles as an
//!   advertisement of a document id.
//! - A message carrying changes is a push; the receiver applies them.
//!
//! The session only compares clocks. Working out which changes the peer is
//! missing is delegated to the CRDT engine, and only happens once the peer
//! has told us something about the document.
//!
//! ## Lifecycle
//!
//! ```text
//! Unopened ──open()──► Open ──close()──► Closed
//! ```

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

use docsync_types::{DocumentId, SyncError, SyncMessage, VectorClock, WireCodec};

use crate::clock_store::{ClockKind, ClockStore};
use crate::store::{CrdtEngine, DocumentOf, DocumentStore, EngineError, StoreError, SubscriptionId};

/// Session errors.
///
/// Errors that carry a document id (see [`SessionError::document_id`])
/// concern that document only; the session keeps serving every other one.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The document has no clock, so it is not a sync-capable document.
    #[error("document {0} has no clock and cannot be used for network sync (is it a snapshot from history?)")]
    NoClock(DocumentId),

    /// The document's clock is behind what this session already advertised.
    #[error("cannot pass an old state of document {document_id} to a sync session")]
    OldClock {
        /// The document.
        document_id: DocumentId,
        /// Clock previously advertised to the peer.
        recorded: VectorClock,
        /// Clock just observed on the document.
        observed: VectorClock,
    },

    /// A push for the document exceeds the outbound size limit.
    #[error("push for document {document_id} is {size} bytes (max {max})")]
    PushTooLarge {
        /// The document.
        document_id: DocumentId,
        /// Encoded size of the push.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// A push for the document could not be encoded.
    #[error("cannot encode push for document {document_id}: {source}")]
    Encoding {
        /// The document.
        document_id: DocumentId,
        /// Underlying codec error.
        source: SyncError,
    },

    /// The message failed validation.
    #[error("malformed message: {0}")]
    Malformed(#[from] SyncError),

    /// The store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The engine rejected an operation.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// `open()` was called more than once.
    #[error("session already opened")]
    AlreadyOpened,

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// The document this error is scoped to, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::NoClock(id) => Some(id),
            Self::OldClock { document_id, .. }
            | Self::PushTooLarge { document_id, .. }
            | Self::Encoding { document_id, .. } => Some(document_id),
            _ => None,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet opened.
    Unopened,
    /// Subscribed to the store's change notifications.
    Open {
        /// The store subscription owned by this session.
        subscription: SubscriptionId,
    },
    /// Terminal.
    Closed,
}

/// A per-document failure collected while processing several documents.
#[derive(Debug)]
pub struct DocumentFailure {
    /// The document that failed.
    pub document_id: DocumentId,
    /// Why.
    pub error: SessionError,
}

/// Result of an operation that touches several documents.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Messages to send to the peer, in order.
    pub messages: Vec<SyncMessage>,
    /// Documents that were skipped.
    pub failures: Vec<DocumentFailure>,
}

impl Outcome {
    fn fail(&mut self, document_id: DocumentId, error: SessionError) {
        self.failures.push(DocumentFailure { document_id, error });
    }
}

/// Result of [`SyncSession::receive`].
#[derive(Debug)]
pub struct Received<D> {
    /// Messages to send back to the peer.
    pub messages: Vec<SyncMessage>,
    /// Current local value of the document, if held.
    pub document: Option<D>,
}

/// Size limit applied to pushes before they are recorded as sent.
#[derive(Debug, Clone, Copy)]
struct OutboundLimit {
    codec: WireCodec,
    max: usize,
}

/// Sync state for one remote peer.
#[derive(Debug)]
pub struct SyncSession {
    peer: String,
    state: SessionState,
    clocks: ClockStore,
    quarantined: BTreeSet<DocumentId>,
    outbound: Option<OutboundLimit>,
}

impl SyncSession {
    /// Create an unopened session for `peer` (used as a log label).
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: SessionState::Unopened,
            clocks: ClockStore::new(),
            quarantined: BTreeSet::new(),
            outbound: None,
        }
    }

    /// Refuse pushes whose `codec` encoding exceeds `max` bytes.
    ///
    /// A refused push is reported as [`SessionError::PushTooLarge`] for its
    /// document and leaves that document's clocks untouched.
    pub fn with_outbound_limit(mut self, codec: WireCodec, max: usize) -> Self {
        self.outbound = Some(OutboundLimit { codec, max });
        self
    }

    /// The peer label.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open { .. })
    }

    /// Clock bookkeeping for this peer.
    pub fn clocks(&self) -> &ClockStore {
        &self.clocks
    }

    /// Whether a document is excluded from sync after a missing clock.
    pub fn is_quarantined(&self, id: &DocumentId) -> bool {
        self.quarantined.contains(id)
    }

    /// Advertise every document in the store and subscribe to changes.
    ///
    /// Each document gets a request carrying its current clock, which is
    /// then recorded as ours. Documents that fail validation are reported
    /// in [`Outcome::failures`] and do not stop the others.
    pub fn open<S: DocumentStore>(&mut self, store: &mut S) -> Result<Outcome, SessionError> {
        match self.state {
            SessionState::Unopened => {}
            SessionState::Open { .. } => return Err(SessionError::AlreadyOpened),
            SessionState::Closed => return Err(SessionError::Closed),
        }

        let ids = store.document_ids();
        debug!(peer = %self.peer, documents = ids.len(), "open");

        let mut outcome = Outcome::default();
        for id in ids {
            if id.is_empty() {
                continue;
            }
            match self.register_document(store, &id) {
                Ok(message) => outcome.messages.push(message),
                Err(error) => outcome.fail(id, error),
            }
        }

        let subscription = store.subscribe();
        self.state = SessionState::Open { subscription };
        Ok(outcome)
    }

    /// Stop receiving change notifications. Idempotent.
    ///
    /// Clock state is kept; messages already returned are unaffected.
    pub fn close<S: DocumentStore>(&mut self, store: &mut S) {
        if let SessionState::Open { subscription } = self.state {
            store.unsubscribe(subscription);
            debug!(peer = %self.peer, "close");
        }
        self.state = SessionState::Closed;
    }

    /// Handle one inbound message.
    ///
    /// Applying changes queues a change notification in the store like any
    /// other mutation; run [`process_notifications`](Self::process_notifications)
    /// afterwards to react to it.
    pub fn receive<S: DocumentStore>(
        &mut self,
        store: &mut S,
        message: SyncMessage,
    ) -> Result<Received<DocumentOf<S>>, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        if message.document_id.is_empty() {
            return Err(SyncError::MalformedMessage("empty documentId".into()).into());
        }

        let SyncMessage {
            document_id: id,
            clock,
            changes,
        } = message;
        let changes = changes.unwrap_or_default();
        debug!(peer = %self.peer, document = %id, changes = changes.len(), "receive");

        self.clocks.merge(&id, ClockKind::Theirs, &clock);
        let have_doc = store.document(&id).is_some();

        let mut messages = Vec::new();
        if !changes.is_empty() {
            store.apply_changes(&id, &changes)?;
        } else if have_doc {
            messages.extend(self.maybe_send_changes(store, &id)?);
        } else {
            messages.push(self.advertise(&id));
        }

        Ok(Received {
            messages,
            document: store.document(&id).cloned(),
        })
    }

    /// React to a local change of one document.
    ///
    /// The new clock is validated against the old recorded one before
    /// anything is sent, and recorded as ours only afterwards.
    pub fn document_changed<S: DocumentStore>(
        &mut self,
        store: &S,
        id: &DocumentId,
    ) -> Result<Vec<SyncMessage>, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        debug!(peer = %self.peer, document = %id, "document changed");

        let clock = self.observe_clock(store, id)?;
        let mut messages = Vec::new();
        messages.extend(self.maybe_send_changes(store, id)?);
        messages.extend(self.maybe_request_changes(id, &clock));
        self.clocks.merge(id, ClockKind::Ours, &clock);
        Ok(messages)
    }

    /// Drain this session's change notifications and react to each.
    ///
    /// Does nothing unless the session is open.
    pub fn process_notifications<S: DocumentStore>(&mut self, store: &mut S) -> Outcome {
        let mut outcome = Outcome::default();
        let SessionState::Open { subscription } = self.state else {
            return outcome;
        };

        for id in store.take_notifications(subscription) {
            match self.document_changed(store, &id) {
                Ok(messages) => outcome.messages.extend(messages),
                Err(error) => outcome.fail(id, error),
            }
        }
        outcome
    }

    /// Push the changes the peer lacks, if we know what the peer has.
    ///
    /// Never pushes to a peer that has not engaged with the document. A push
    /// carries the document's full clock, which is merged into both ours and
    /// theirs: it is now a state the peer has been sent. The merge happens
    /// only once the push has passed the outbound limit.
    pub fn maybe_send_changes<S: DocumentStore>(
        &mut self,
        store: &S,
        id: &DocumentId,
    ) -> Result<Option<SyncMessage>, SessionError> {
        if self.quarantined.contains(id) {
            return Ok(None);
        }
        let Some(document) = store.document(id) else {
            return Ok(None);
        };
        let changes = match self.clocks.theirs(id) {
            Some(theirs) => store.engine().missing_changes(document, theirs)?,
            None => return Ok(None),
        };
        if changes.is_empty() {
            return Ok(None);
        }

        let Some(clock) = store.engine().clock_of(document) else {
            warn!(peer = %self.peer, document = %id, "document has no clock");
            self.quarantined.insert(id.clone());
            return Err(SessionError::NoClock(id.clone()));
        };
        let message = SyncMessage::push(id.clone(), clock, changes);
        self.check_outbound(&message)?;
        debug!(peer = %self.peer, document = %id, changes = message.changes().len(), "push");

        self.clocks.merge(id, ClockKind::Ours, &message.clock);
        self.clocks.merge(id, ClockKind::Theirs, &message.clock);
        Ok(Some(message))
    }

    /// Request changes if `observed` is not covered by what we advertised.
    pub fn maybe_request_changes(
        &self,
        id: &DocumentId,
        observed: &VectorClock,
    ) -> Option<SyncMessage> {
        if self.quarantined.contains(id) || observed.less_or_equal(self.clocks.ours(id)) {
            None
        } else {
            Some(self.request_changes(id, observed.clone()))
        }
    }

    /// A changes-less message carrying `clock`.
    pub fn request_changes(&self, id: &DocumentId, clock: VectorClock) -> SyncMessage {
        debug!(peer = %self.peer, document = %id, "request");
        SyncMessage::request(id.clone(), clock)
    }

    /// A changes-less message carrying the empty clock.
    pub fn advertise(&self, id: &DocumentId) -> SyncMessage {
        debug!(peer = %self.peer, document = %id, "advertise");
        SyncMessage::advertise(id.clone())
    }

    fn check_outbound(&self, message: &SyncMessage) -> Result<(), SessionError> {
        let Some(limit) = self.outbound else {
            return Ok(());
        };
        let size = limit
            .codec
            .encode(message)
            .map_err(|source| SessionError::Encoding {
                document_id: message.document_id.clone(),
                source,
            })?
            .len();
        if size > limit.max {
            warn!(peer = %self.peer, document = %message.document_id, size, max = limit.max, "push too large");
            return Err(SessionError::PushTooLarge {
                document_id: message.document_id.clone(),
                size,
                max: limit.max,
            });
        }
        Ok(())
    }

    fn register_document<S: DocumentStore>(
        &mut self,
        store: &S,
        id: &DocumentId,
    ) -> Result<SyncMessage, SessionError> {
        let clock = self.observe_clock(store, id)?;
        let message = self.request_changes(id, clock.clone());
        self.clocks.merge(id, ClockKind::Ours, &clock);
        Ok(message)
    }

    /// Extract and validate a document's clock.
    fn observe_clock<S: DocumentStore>(
        &mut self,
        store: &S,
        id: &DocumentId,
    ) -> Result<VectorClock, SessionError> {
        let Some(clock) = store.document(id).and_then(|d| store.engine().clock_of(d)) else {
            warn!(peer = %self.peer, document = %id, "document has no clock");
            self.quarantined.insert(id.clone());
            return Err(SessionError::NoClock(id.clone()));
        };

        let recorded = self.clocks.ours(id);
        if !recorded.less_or_equal(&clock) {
            warn!(peer = %self.peer, document = %id, "document clock went backwards");
            return Err(SessionError::OldClock {
                document_id: id.clone(),
                recorded: recorded.clone(),
                observed: clock,
            });
        }

        self.quarantined.remove(id);
        Ok(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRepo, Op, OpLogEngine};
    use docsync_types::{ActorId, Change, MessageRole, WireCodec};

    fn doc() -> DocumentId {
        DocumentId::new("D")
    }

    fn actor(name: &str) -> ActorId {
        ActorId::new(name)
    }

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs.iter().map(|&(a, c)| (a, c)).collect()
    }

    fn repo() -> MemoryRepo {
        MemoryRepo::default()
    }

    /// One side of a simulated connection.
    struct Peer {
        session: SyncSession,
        repo: MemoryRepo,
        inbox: Vec<SyncMessage>,
    }

    impl Peer {
        fn new(name: &str, repo: MemoryRepo) -> Self {
            Self {
                session: SyncSession::new(name),
                repo,
                inbox: Vec::new(),
            }
        }

        fn open(&mut self) -> Vec<SyncMessage> {
            let outcome = self.session.open(&mut self.repo).unwrap();
            assert!(outcome.failures.is_empty());
            outcome.messages
        }

        /// Deliver everything in the inbox, reacting to resulting changes.
        fn step(&mut self) -> Vec<SyncMessage> {
            let mut out = Vec::new();
            for message in std::mem::take(&mut self.inbox) {
                let received = self.session.receive(&mut self.repo, message).unwrap();
                out.extend(received.messages);
                out.extend(self.flush());
            }
            out
        }

        fn flush(&mut self) -> Vec<SyncMessage> {
            let outcome = self.session.process_notifications(&mut self.repo);
            assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
            outcome.messages
        }
    }

    /// Shuttle messages until both inboxes are empty. Returns message count.
    fn exchange(a: &mut Peer, b: &mut Peer) -> usize {
        let mut delivered = 0;
        for _ in 0..100 {
            if a.inbox.is_empty() && b.inbox.is_empty() {
                return delivered;
            }
            delivered += a.inbox.len() + b.inbox.len();
            let to_b = a.step();
            let to_a = b.step();
            b.inbox.extend(to_b);
            a.inbox.extend(to_a);
        }
        panic!("message exchange did not terminate");
    }

    fn assert_converged(a: &Peer, b: &Peer, id: &DocumentId) {
        assert_eq!(a.repo.op_log(id), b.repo.op_log(id));
        assert_eq!(a.session.clocks().theirs(id), Some(b.session.clocks().ours(id)));
        assert_eq!(b.session.clocks().theirs(id), Some(a.session.clocks().ours(id)));
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    #[test]
    fn starts_unopened() {
        let session = SyncSession::new("peer");
        assert_eq!(session.state(), SessionState::Unopened);
        assert!(!session.is_open());
    }

    #[test]
    fn open_advertises_each_document_with_its_clock() {
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let mut session = SyncSession::new("peer");

        let outcome = session.open(&mut store).unwrap();

        assert_eq!(outcome.messages, vec![SyncMessage::request(doc(), clock(&[("A", 1)]))]);
        assert_eq!(session.clocks().ours(&doc()), &clock(&[("A", 1)]));
        assert!(session.clocks().theirs(&doc()).is_none());
        assert!(session.is_open());
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn open_skips_empty_document_ids() {
        let mut store = repo();
        store.change(&DocumentId::new(""), &actor("A"), vec![]);
        let mut session = SyncSession::new("peer");

        let outcome = session.open(&mut store).unwrap();
        assert!(outcome.messages.is_empty());
    }

    #[test]
    fn open_twice_fails() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();

        assert!(matches!(session.open(&mut store), Err(SessionError::AlreadyOpened)));
    }

    #[test]
    fn close_unsubscribes_and_is_idempotent() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();

        session.close(&mut store);
        session.close(&mut store);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn closed_session_cannot_reopen_or_receive() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();
        session.close(&mut store);

        assert!(matches!(session.open(&mut store), Err(SessionError::Closed)));
        assert!(matches!(
            session.receive(&mut store, SyncMessage::advertise(doc())),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn closed_session_ignores_later_changes() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();
        session.close(&mut store);

        store.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let outcome = session.process_notifications(&mut store);
        assert!(outcome.messages.is_empty());
    }

    // ===========================================
    // Receive
    // ===========================================

    #[test]
    fn receive_merges_their_clock() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");

        session
            .receive(&mut store, SyncMessage::request(doc(), clock(&[("B", 2)])))
            .unwrap();

        assert_eq!(session.clocks().theirs(&doc()), Some(&clock(&[("B", 2)])));
    }

    #[test]
    fn receive_for_unknown_document_advertises() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");

        let received = session
            .receive(&mut store, SyncMessage::request(doc(), clock(&[("B", 1)])))
            .unwrap();

        assert_eq!(received.messages, vec![SyncMessage::advertise(doc())]);
        assert!(received.document.is_none());
    }

    #[test]
    fn receive_rejects_empty_document_id_without_touching_clocks() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");

        let result = session.receive(
            &mut store,
            SyncMessage::request(DocumentId::new(""), clock(&[("B", 1)])),
        );

        assert!(matches!(result, Err(SessionError::Malformed(_))));
        assert!(session.clocks().documents().is_empty());
    }

    #[test]
    fn receive_with_undecodable_changes_keeps_document_unchanged() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        let message = SyncMessage::push(doc(), clock(&[("B", 1)]), vec![Change::from_bytes(vec![0xc1])]);

        let result = session.receive(&mut store, message);

        assert!(matches!(result, Err(SessionError::Store(_))));
        assert!(store.op_log(&doc()).is_none());
    }

    #[test]
    fn receive_returns_current_document() {
        let mut source = repo();
        source.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let changes = OpLogEngine
            .missing_changes(source.op_log(&doc()).unwrap(), &VectorClock::new())
            .unwrap();

        let mut store = repo();
        let mut session = SyncSession::new("peer");
        let received = session
            .receive(&mut store, SyncMessage::push(doc(), clock(&[("A", 1)]), changes))
            .unwrap();

        assert!(received.messages.is_empty());
        assert_eq!(received.document.unwrap().get("k"), Some("v".to_string()));
    }

    #[test]
    fn duplicate_push_is_idempotent() {
        let mut source = repo();
        source.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let changes = OpLogEngine
            .missing_changes(source.op_log(&doc()).unwrap(), &VectorClock::new())
            .unwrap();
        let push = SyncMessage::push(doc(), clock(&[("A", 1)]), changes);

        let mut store = repo();
        let mut session = SyncSession::new("peer");
        let once = session.receive(&mut store, push.clone()).unwrap().document;
        let twice = session.receive(&mut store, push).unwrap().document;

        assert_eq!(once, twice);
        assert_eq!(store.op_log(&doc()), source.op_log(&doc()));
    }

    // ===========================================
    // Push / pull decisions
    // ===========================================

    #[test]
    fn no_unsolicited_push() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);

        assert!(session.maybe_send_changes(&store, &doc()).unwrap().is_none());
    }

    #[test]
    fn maybe_request_changes_only_when_not_dominated() {
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![]);
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();

        assert!(session.maybe_request_changes(&doc(), &clock(&[("A", 1)])).is_none());
        assert_eq!(
            session.maybe_request_changes(&doc(), &clock(&[("A", 1), ("B", 1)])),
            Some(SyncMessage::request(doc(), clock(&[("A", 1), ("B", 1)])))
        );
    }

    #[test]
    fn request_then_push_scenario() {
        // A authors one change; B asks with an empty clock.
        let mut store = repo();
        let mut session = SyncSession::new("B");
        session.open(&mut store).unwrap();

        store.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let outcome = session.process_notifications(&mut store);
        assert!(
            outcome.messages.iter().all(|m| m.role() == MessageRole::Request),
            "theirs unknown: no push yet"
        );

        let reply = session
            .receive(&mut store, SyncMessage::request(doc(), VectorClock::new()))
            .unwrap();
        assert_eq!(reply.messages.len(), 1);
        let push = &reply.messages[0];
        assert_eq!(push.role(), MessageRole::Push);
        assert_eq!(push.clock, clock(&[("A", 1)]));
        assert_eq!(push.changes().len(), 1);

        // B applies c1
        let mut remote = repo();
        remote.apply_changes(&doc(), push.changes()).unwrap();
        assert_eq!(remote.op_log(&doc()).unwrap().clock(), &clock(&[("A", 1)]));

        // Same request again yields nothing new
        let again = session
            .receive(&mut store, SyncMessage::request(doc(), VectorClock::new()))
            .unwrap();
        assert!(again.messages.is_empty());
    }

    #[test]
    fn document_registered_mid_session_is_requested() {
        let mut store = repo();
        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();

        store.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let messages = session.document_changed(&store, &doc()).unwrap();

        assert_eq!(messages, vec![SyncMessage::request(doc(), clock(&[("A", 1)]))]);
        assert_eq!(session.clocks().ours(&doc()), &clock(&[("A", 1)]));
    }

    // ===========================================
    // Errors
    // ===========================================

    #[test]
    fn old_clock_is_rejected() {
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "1")]);
        let old = store.op_log(&doc()).unwrap().clone();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "2")]);

        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();

        store.set_document(doc(), old);
        let outcome = session.process_notifications(&mut store);

        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0].error,
            SessionError::OldClock { recorded, observed, .. }
                if recorded == &clock(&[("A", 2)]) && observed == &clock(&[("A", 1)])
        ));
        // Recorded clock did not regress
        assert_eq!(session.clocks().ours(&doc()), &clock(&[("A", 2)]));
    }

    #[test]
    fn errors_are_scoped_to_one_document() {
        let other = DocumentId::new("other");
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "1")]);
        let old = store.op_log(&doc()).unwrap().clone();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "2")]);

        let mut session = SyncSession::new("peer");
        session.open(&mut store).unwrap();

        store.set_document(doc(), old);
        store.change(&other, &actor("A"), vec![Op::set("x", "y")]);
        let outcome = session.process_notifications(&mut store);

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document_id, doc());
        assert_eq!(outcome.messages, vec![SyncMessage::request(other, clock(&[("A", 1)]))]);
    }

    /// Engine whose documents may lack a clock.
    #[derive(Debug, Clone, Copy, Default)]
    struct SnapshotEngine;

    impl CrdtEngine for SnapshotEngine {
        type Document = Option<VectorClock>;

        fn clock_of(&self, document: &Option<VectorClock>) -> Option<VectorClock> {
            document.clone()
        }

        fn missing_changes(
            &self,
            _document: &Option<VectorClock>,
            _since: &VectorClock,
        ) -> Result<Vec<Change>, EngineError> {
            Ok(vec![Change::from_bytes(vec![1])])
        }

        fn apply_changes(
            &self,
            document: Option<&Option<VectorClock>>,
            _changes: &[Change],
        ) -> Result<Option<VectorClock>, EngineError> {
            Ok(document.cloned().flatten())
        }
    }

    #[test]
    fn document_without_clock_is_quarantined_until_corrected() {
        let mut store = MemoryRepo::new(SnapshotEngine);
        store.set_document(doc(), None);
        store.set_document(DocumentId::new("fine"), Some(clock(&[("A", 1)])));

        let mut session = SyncSession::new("peer");
        let outcome = session.open(&mut store).unwrap();

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, SessionError::NoClock(_)));
        assert!(session.is_quarantined(&doc()));

        // A request for the quarantined document does not trigger a push
        let received = session
            .receive(&mut store, SyncMessage::advertise(doc()))
            .unwrap();
        assert!(received.messages.is_empty());

        // A later valid state lifts the quarantine
        store.set_document(doc(), Some(clock(&[("A", 1)])));
        let outcome = session.process_notifications(&mut store);
        assert!(outcome.failures.is_empty());
        assert!(!session.is_quarantined(&doc()));
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].role(), MessageRole::Push);
    }

    #[test]
    fn error_reports_its_document() {
        let err = SessionError::NoClock(doc());
        assert_eq!(err.document_id(), Some(&doc()));
        assert!(SessionError::Closed.document_id().is_none());

        let err = SessionError::PushTooLarge {
            document_id: doc(),
            size: 10,
            max: 5,
        };
        assert_eq!(err.document_id(), Some(&doc()));
    }

    #[test]
    fn push_attempt_without_clock_quarantines() {
        let mut store = MemoryRepo::new(SnapshotEngine);
        store.set_document(doc(), None);
        let mut session = SyncSession::new("peer");

        let result = session.receive(&mut store, SyncMessage::advertise(doc()));

        assert!(matches!(result, Err(SessionError::NoClock(_))));
        assert!(session.is_quarantined(&doc()));
        let again = session
            .receive(&mut store, SyncMessage::advertise(doc()))
            .unwrap();
        assert!(again.messages.is_empty());
    }

    #[test]
    fn oversized_push_is_refused_without_recording_it() {
        let big = DocumentId::new("big");
        let small = DocumentId::new("small");
        let mut store = repo();
        store.change(&big, &actor("A"), vec![Op::set("k", "1")]);
        store.change(&small, &actor("A"), vec![Op::set("k", "1")]);

        let mut session =
            SyncSession::new("peer").with_outbound_limit(WireCodec::MessagePack, 400);
        session.open(&mut store).unwrap();
        for id in [&big, &small] {
            let request = SyncMessage::request(id.clone(), clock(&[("A", 1)]));
            let received = session.receive(&mut store, request).unwrap();
            assert!(received.messages.is_empty());
        }

        store.change(&big, &actor("A"), vec![Op::set("k", "x".repeat(2000))]);
        store.change(&small, &actor("A"), vec![Op::set("k", "2")]);
        let outcome = session.process_notifications(&mut store);

        // The big document fails alone; the small one is still pushed
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document_id, big);
        assert!(matches!(
            outcome.failures[0].error,
            SessionError::PushTooLarge { max: 400, .. }
        ));
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].document_id, small);
        assert_eq!(outcome.messages[0].role(), MessageRole::Push);

        // Nothing was recorded as sent for the refused push
        assert_eq!(session.clocks().theirs(&big), Some(&clock(&[("A", 1)])));
        assert_eq!(session.clocks().ours(&big), &clock(&[("A", 1)]));
        assert_eq!(session.clocks().theirs(&small), Some(&clock(&[("A", 2)])));

        // A fresh request for the big document is refused again, not ignored
        let retry = session.receive(&mut store, SyncMessage::request(big.clone(), clock(&[("A", 1)])));
        assert!(matches!(retry, Err(SessionError::PushTooLarge { .. })));
        assert_eq!(session.clocks().theirs(&big), Some(&clock(&[("A", 1)])));
    }

    // ===========================================
    // Two-peer convergence
    // ===========================================

    #[test]
    fn both_open_with_no_documents_exchanges_nothing() {
        let mut a = Peer::new("a", repo());
        let mut b = Peer::new("b", repo());
        b.inbox = a.open();
        a.inbox = b.open();

        assert_eq!(exchange(&mut a, &mut b), 0);
    }

    #[test]
    fn one_sided_document_converges_after_open() {
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![Op::set("title", "hello")]);
        let mut a = Peer::new("a", store);
        let mut b = Peer::new("b", repo());

        b.inbox = a.open();
        a.inbox = b.open();
        exchange(&mut a, &mut b);

        assert_converged(&a, &b, &doc());
        assert_eq!(b.repo.op_log(&doc()).unwrap().get("title"), Some("hello".to_string()));
        assert_eq!(b.session.clocks().ours(&doc()), &clock(&[("A", 1)]));
    }

    #[test]
    fn advertisement_from_peer_without_document() {
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "v")]);
        let mut a = Peer::new("a", store);
        let mut b = Peer::new("b", repo());
        a.open();
        b.open();

        // B learns the id before hearing from A
        a.inbox.push(b.session.advertise(&doc()));
        exchange(&mut a, &mut b);

        assert_converged(&a, &b, &doc());
        assert_eq!(b.session.clocks().ours(&doc()), &clock(&[("A", 1)]));
    }

    #[test]
    fn concurrent_edits_converge() {
        let mut store_a = repo();
        store_a.change(&doc(), &actor("A"), vec![Op::set("a", "1")]);
        let mut store_b = repo();
        store_b.change(&doc(), &actor("B"), vec![Op::set("b", "1")]);
        let mut a = Peer::new("a", store_a);
        let mut b = Peer::new("b", store_b);

        b.inbox = a.open();
        a.inbox = b.open();
        exchange(&mut a, &mut b);

        assert_converged(&a, &b, &doc());
        let value = a.repo.op_log(&doc()).unwrap().value();
        assert_eq!(value.len(), 2);
    }

    #[test]
    fn live_edits_flow_after_initial_sync() {
        let mut store = repo();
        store.change(&doc(), &actor("A"), vec![Op::set("k", "1")]);
        let mut a = Peer::new("a", store);
        let mut b = Peer::new("b", repo());
        b.inbox = a.open();
        a.inbox = b.open();
        exchange(&mut a, &mut b);

        a.repo.change(&doc(), &actor("A"), vec![Op::set("k", "2")]);
        b.inbox = a.flush();
        assert_eq!(b.inbox.len(), 1);
        assert_eq!(b.inbox[0].changes().len(), 1, "only the new change is pushed");
        exchange(&mut a, &mut b);

        b.repo.change(&doc(), &actor("B"), vec![Op::set("k", "3")]);
        a.inbox = b.flush();
        exchange(&mut a, &mut b);

        assert_converged(&a, &b, &doc());
        assert_eq!(a.repo.op_log(&doc()).unwrap().get("k"), Some("3".to_string()));
    }

    #[test]
    fn many_documents_converge() {
        let mut store_a = repo();
        let mut store_b = repo();
        for i in 0..5 {
            let id = DocumentId::new(format!("doc-{}", i));
            if i % 2 == 0 {
                store_a.change(&id, &actor("A"), vec![Op::set("n", i.to_string())]);
            } else {
                store_b.change(&id, &actor("B"), vec![Op::set("n", i.to_string())]);
            }
        }
        let mut a = Peer::new("a", store_a);
        let mut b = Peer::new("b", store_b);

        b.inbox = a.open();
        a.inbox = b.open();
        exchange(&mut a, &mut b);

        assert_eq!(a.repo.to_snapshot(), b.repo.to_snapshot());
        assert_eq!(a.repo.len(), 5);
        for i in 0..5 {
            assert_converged(&a, &b, &DocumentId::new(format!("doc-{}", i)));
        }
    }
}
