//! Crash-safe resume for batch runs.
//!
//! A [`Checkpoint`] is a durable snapshot of per-item batch state, written
//! atomically after every state transition by the orchestrator. On restart
//! the orchestrator reloads it and continues where the previous process
//! stopped.

pub mod checkpoint;
pub mod store;

pub use checkpoint::{Checkpoint, ItemRecord, StateCounts};
pub use store::{CheckpointError, CheckpointStore};
