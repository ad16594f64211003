//! Vector clocks for docsync.
//!
//! A vector clock maps each actor to the highest sequence number seen from
//! it. Actors that are absent count as zero, so the stored map never keeps
//! explicit zero entries; two clocks that differ only by zero entries are
//! therefore equal.
//!
//! Clocks form a partial order: `a <= b` iff every counter in `a` is at most
//! the matching counter in `b`. Concurrent clocks are incomparable.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::ActorId;

/// Per-actor causal counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<ActorId, u64>", into = "BTreeMap<ActorId, u64>")]
pub struct VectorClock {
    counters: BTreeMap<ActorId, u64>,
}

impl VectorClock {
    /// Create an empty clock (every actor at zero).
    pub const fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    /// Build a clock from `(actor, counter)` pairs.
    ///
    /// Repeated actors keep the largest counter.
    pub fn from_pairs<A, I>(pairs: I) -> Self
    where
        A: Into<ActorId>,
        I: IntoIterator<Item = (A, u64)>,
    {
        let mut clock = Self::new();
        for (actor, counter) in pairs {
            let actor = actor.into();
            let merged = clock.get(actor.as_str()).max(counter);
            clock.set(actor, merged);
        }
        clock
    }

    /// Counter for an actor; zero when absent.
    pub fn get(&self, actor: &str) -> u64 {
        self.counters.get(actor).copied().unwrap_or(0)
    }

    /// Set the counter for an actor. Setting zero removes the entry.
    pub fn set(&mut self, actor: impl Into<ActorId>, counter: u64) {
        let actor = actor.into();
        if counter == 0 {
            self.counters.remove(&actor);
        } else {
            self.counters.insert(actor, counter);
        }
    }

    /// Increment an actor's counter and return the new value.
    pub fn increment(&mut self, actor: impl Into<ActorId>) -> u64 {
        let counter = self.counters.entry(actor.into()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Merge another clock into this one, keeping the maximum per actor.
    pub fn merge(&mut self, other: &VectorClock) {
        for (actor, &counter) in &other.counters {
            let current = self.counters.entry(actor.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Component-wise maximum of two clocks, leaving both untouched.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Partial order test: every counter in `self` is `<=` the one in `other`.
    pub fn less_or_equal(&self, other: &VectorClock) -> bool {
        self.counters
            .iter()
            .all(|(actor, &counter)| counter <= other.get(actor.as_str()))
    }

    /// Neither clock dominates the other.
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        !self.less_or_equal(other) && !other.less_or_equal(self)
    }

    /// Whether every actor is at zero.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Number of actors with a non-zero counter.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Iterate over `(actor, counter)` pairs in actor order.
    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, u64)> {
        self.counters.iter().map(|(actor, &counter)| (actor, counter))
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.less_or_equal(other), other.less_or_equal(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl From<BTreeMap<ActorId, u64>> for VectorClock {
    fn from(counters: BTreeMap<ActorId, u64>) -> Self {
        let counters = counters.into_iter().filter(|&(_, c)| c > 0).collect();
        Self { counters }
    }
}

impl From<VectorClock> for BTreeMap<ActorId, u64> {
    fn from(clock: VectorClock) -> Self {
        clock.counters
    }
}

impl<A: Into<ActorId>> FromIterator<(A, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (A, u64)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}
