//! In-memory document store.

use std::collections::{BTreeMap, HashMap};

use docsync_types::{ActorId, Change, DocumentId, VectorClock};

use super::engine::{Op, OpLog, OpLogEngine};
use crate::store::{CrdtEngine, DocumentStore, StoreError, SubscriptionId};

/// Documents held in memory, with per-subscription change queues.
#[derive(Debug, Clone)]
pub struct MemoryRepo<E: CrdtEngine = OpLogEngine> {
    engine: E,
    documents: BTreeMap<DocumentId, E::Document>,
    subscribers: HashMap<SubscriptionId, Vec<DocumentId>>,
    next_subscription: u64,
}

impl<E: CrdtEngine + Default> Default for MemoryRepo<E> {
    fn default() -> Self {
        Self::new(E::default())
    }
}

impl<E: CrdtEngine> MemoryRepo<E> {
    /// Create an empty repo over `engine`.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            documents: BTreeMap::new(),
            subscribers: HashMap::new(),
            next_subscription: 1,
        }
    }

    /// Replace a document's value and notify subscribers.
    ///
    /// This is the local-mutation entry point. Nothing stops a caller from
    /// storing an older value here; sessions reject that as an old clock.
    pub fn set_document(&mut self, id: DocumentId, document: E::Document) {
        self.documents.insert(id.clone(), document);
        self.notify(&id);
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of documents held.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no documents are held.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn notify(&mut self, id: &DocumentId) {
        for queue in self.subscribers.values_mut() {
            queue.push(id.clone());
        }
    }
}

impl MemoryRepo<OpLogEngine> {
    /// Author a local change as `actor` and store the result.
    ///
    /// Returns the document's new clock.
    pub fn change(&mut self, id: &DocumentId, actor: &ActorId, ops: Vec<Op>) -> VectorClock {
        let next = self.engine.change(self.documents.get(id), actor, ops);
        let clock = next.clock().clone();
        self.set_document(id.clone(), next);
        clock
    }

    /// Build a repo whose documents hold the given key/value contents,
    /// each authored as a single change by `actor`.
    pub fn from_snapshot(
        actor: &ActorId,
        snapshot: BTreeMap<DocumentId, BTreeMap<String, String>>,
    ) -> Self {
        let mut repo = Self::default();
        for (id, entries) in snapshot {
            let ops = entries.into_iter().map(|(k, v)| Op::set(k, v)).collect();
            let document = repo.engine.change(None, actor, ops);
            repo.documents.insert(id, document);
        }
        repo
    }

    /// Materialized contents of every document.
    pub fn to_snapshot(&self) -> BTreeMap<DocumentId, BTreeMap<String, String>> {
        self.documents
            .iter()
            .map(|(id, doc)| (id.clone(), doc.value()))
            .collect()
    }

    /// Borrow a document as an [`OpLog`].
    pub fn op_log(&self, id: &DocumentId) -> Option<&OpLog> {
        self.documents.get(id)
    }
}

impl<E: CrdtEngine> DocumentStore for MemoryRepo<E> {
    type Engine = E;

    fn engine(&self) -> &E {
        &self.engine
    }

    fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.keys().cloned().collect()
    }

    fn document(&self, id: &DocumentId) -> Option<&E::Document> {
        self.documents.get(id)
    }

    fn apply_changes(&mut self, id: &DocumentId, changes: &[Change]) -> Result<(), StoreError> {
        let next = self.engine.apply_changes(self.documents.get(id), changes)?;
        self.set_document(id.clone(), next);
        Ok(())
    }

    fn subscribe(&mut self) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.insert(id, Vec::new());
        id
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.subscribers.remove(&subscription).is_some()
    }

    fn take_notifications(&mut self, subscription: SubscriptionId) -> Vec<DocumentId> {
        self.subscribers
            .get_mut(&subscription)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}
