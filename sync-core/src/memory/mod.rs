//! In-memory collaborators.
//!
//! [`MemoryRepo`] is a [`DocumentStore`](crate::DocumentStore) over any
//! engine, and [`OpLogEngine`] is a small op-based CRDT. Together they are
//! enough to run real sessions in tests without an external CRDT library.

mod engine;
mod repo;

pub use engine::{ChangeRecord, Op, OpLog, OpLogEngine};
pub use repo::MemoryRepo;
