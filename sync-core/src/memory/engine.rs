//! A minimal op-based CRDT engine.
//!
//! Documents are string-keyed maps. Every local edit becomes a
//! [`ChangeRecord`] stamped with the author's next sequence number, a
//! Lamport time, and the clock it was made against. Changes that arrive
//! before their dependencies wait in a pending set until they are causally
//! ready. Values are materialized last-writer-wins by `(time, actor)`, which
//! is the same on every replica that has applied the same changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use docsync_types::{ActorId, Change, VectorClock};

use crate::store::{CrdtEngine, EngineError};

/// A single key assignment. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    /// Key being written.
    pub key: String,
    /// New value, or `None` to delete.
    pub value: Option<String>,
}

impl Op {
    /// Set `key` to `value`.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Delete `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// One change as authored by an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Author.
    pub actor: ActorId,
    /// Author's sequence number, starting at 1.
    pub seq: u64,
    /// Lamport time; greater than the time of every dependency.
    pub time: u64,
    /// Clock the change was made against.
    pub deps: VectorClock,
    /// Key assignments, applied in order.
    pub ops: Vec<Op>,
}

impl ChangeRecord {
    /// Encode into an opaque [`Change`].
    pub fn encode(&self) -> Result<Change, EngineError> {
        rmp_serde::to_vec_named(self)
            .map(Change::from_bytes)
            .map_err(|e| EngineError::Encode(e.to_string()))
    }

    /// Decode from an opaque [`Change`].
    pub fn decode(change: &Change) -> Result<Self, EngineError> {
        let record: Self = rmp_serde::from_slice(change.as_bytes())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        if record.seq == 0 {
            return Err(EngineError::InvalidChange(format!(
                "{} has sequence number 0",
                record.actor
            )));
        }
        Ok(record)
    }

    fn key(&self) -> (ActorId, u64) {
        (self.actor.clone(), self.seq)
    }

    fn order_key(&self) -> (u64, &ActorId, u64) {
        (self.time, &self.actor, self.seq)
    }
}

/// Document state of the op-log engine.
///
/// Two replicas that have applied the same set of changes compare equal,
/// whatever order the changes arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpLog {
    applied: BTreeMap<(ActorId, u64), ChangeRecord>,
    pending: BTreeMap<(ActorId, u64), ChangeRecord>,
    clock: VectorClock,
}

impl OpLog {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock covering every applied change.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Number of applied changes.
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// Whether no change has been applied.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Number of changes waiting for their dependencies.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Materialized key/value view.
    pub fn value(&self) -> BTreeMap<String, String> {
        let mut value = BTreeMap::new();
        for record in self.in_causal_order() {
            for op in &record.ops {
                match &op.value {
                    Some(v) => {
                        value.insert(op.key.clone(), v.clone());
                    }
                    None => {
                        value.remove(&op.key);
                    }
                }
            }
        }
        value
    }

    /// Read one key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.value().remove(key)
    }

    fn max_time(&self) -> u64 {
        self.applied.values().map(|r| r.time).max().unwrap_or(0)
    }

    fn in_causal_order(&self) -> Vec<&ChangeRecord> {
        let mut records: Vec<&ChangeRecord> = self.applied.values().collect();
        records.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        records
    }

    fn is_ready(&self, record: &ChangeRecord) -> bool {
        record.seq == self.clock.get(record.actor.as_str()) + 1
            && record.deps.less_or_equal(&self.clock)
    }

    fn insert(&mut self, record: ChangeRecord) {
        if record.seq <= self.clock.get(record.actor.as_str()) {
            return;
        }
        self.pending.entry(record.key()).or_insert(record);
        self.drain_ready();
    }

    fn drain_ready(&mut self) {
        loop {
            let ready = self
                .pending
                .iter()
                .find(|(_, r)| self.is_ready(r))
                .map(|(key, _)| key.clone());
            let Some(key) = ready else { break };
            if let Some(record) = self.pending.remove(&key) {
                self.clock.set(record.actor.clone(), record.seq);
                self.applied.insert(key, record);
            }
        }
    }
}

/// The op-log CRDT engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpLogEngine;

impl OpLogEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }

    /// Author a local change on top of `document`.
    pub fn change(&self, document: Option<&OpLog>, actor: &ActorId, ops: Vec<Op>) -> OpLog {
        let mut next = document.cloned().unwrap_or_default();
        let record = ChangeRecord {
            actor: actor.clone(),
            seq: next.clock.get(actor.as_str()) + 1,
            time: next.max_time() + 1,
            deps: next.clock.clone(),
            ops,
        };
        next.insert(record);
        next
    }
}

impl CrdtEngine for OpLogEngine {
    type Document = OpLog;

    fn clock_of(&self, document: &OpLog) -> Option<VectorClock> {
        Some(document.clock.clone())
    }

    fn missing_changes(
        &self,
        document: &OpLog,
        since: &VectorClock,
    ) -> Result<Vec<Change>, EngineError> {
        document
            .in_causal_order()
            .into_iter()
            .filter(|r| r.seq > since.get(r.actor.as_str()))
            .map(ChangeRecord::encode)
            .collect()
    }

    fn apply_changes(
        &self,
        document: Option<&OpLog>,
        changes: &[Change],
    ) -> Result<OpLog, EngineError> {
        let records = changes
            .iter()
            .map(ChangeRecord::decode)
            .collect::<Result<Vec<_>, _>>()?;

        let mut next = document.cloned().unwrap_or_default();
        for record in records {
            next.insert(record);
        }
        Ok(next)
    }
}
