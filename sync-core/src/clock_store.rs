//! Per-session clock bookkeeping.
//!
//! For every document a session has seen, the store keeps two clocks:
//! - **ours**: the most recent clock we have advertised to the peer
//! - **theirs**: the most recent clock we believe the peer has
//!
//! "ours" defaults to the empty clock. "theirs" defaults to *unknown*, which
//! is different from empty: unknown means the peer has never engaged with
//! the document, empty means we believe the peer has nothing.
//!
//! [`ClockStore::merge`] is the only mutator. It takes the component-wise
//! maximum, so both clocks are monotonically non-decreasing.

use std::collections::HashMap;

use docsync_types::{DocumentId, VectorClock};

static EMPTY_CLOCK: VectorClock = VectorClock::new();

/// Which of the two per-document clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// What we have advertised to the peer.
    Ours,
    /// What we believe the peer has.
    Theirs,
}

/// Clock pairs for every document one session tracks.
#[derive(Debug, Clone, Default)]
pub struct ClockStore {
    ours: HashMap<DocumentId, VectorClock>,
    theirs: HashMap<DocumentId, VectorClock>,
}

impl ClockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored clock of the given kind, `None` if never recorded.
    pub fn get(&self, id: &DocumentId, kind: ClockKind) -> Option<&VectorClock> {
        self.table(kind).get(id)
    }

    /// Our advertised clock, defaulting to empty.
    pub fn ours(&self, id: &DocumentId) -> &VectorClock {
        self.ours.get(id).unwrap_or(&EMPTY_CLOCK)
    }

    /// The peer's clock, `None` while unknown.
    pub fn theirs(&self, id: &DocumentId) -> Option<&VectorClock> {
        self.theirs.get(id)
    }

    /// Merge `incoming` into the stored clock and return the result.
    ///
    /// Merging into an unknown "theirs" makes it known.
    pub fn merge(&mut self, id: &DocumentId, kind: ClockKind, incoming: &VectorClock) -> &VectorClock {
        let clock = self.table_mut(kind).entry(id.clone()).or_default();
        clock.merge(incoming);
        clock
    }

    /// Partial-order test on two clocks.
    pub fn less_or_equal(a: &VectorClock, b: &VectorClock) -> bool {
        a.less_or_equal(b)
    }

    /// Ids of every document with at least one recorded clock.
    pub fn documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.ours.keys().chain(self.theirs.keys()).cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn table(&self, kind: ClockKind) -> &HashMap<DocumentId, VectorClock> {
        match kind {
            ClockKind::Ours => &self.ours,
            ClockKind::Theirs => &self.theirs,
        }
    }

    fn table_mut(&mut self, kind: ClockKind) -> &mut HashMap<DocumentId, VectorClock> {
        match kind {
            ClockKind::Ours => &mut self.ours,
            ClockKind::Theirs => &mut self.theirs,
        }
    }
}
