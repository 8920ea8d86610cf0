//! Stabilization and correction: counter store, fuzzy fragment correction,
//! and the partial/final event merge logic.

pub mod correction;
pub mod stabilizer;
pub mod store;

pub use stabilizer::{CaptionEvent, CaptionKind, Stabilizer};
pub use store::{CounterStore, MemoryStore, SqliteStore};
