//! Speech engine trait, backends, and the per-session worker pool.

pub mod engine;
pub mod worker;

pub use engine::{build_engine, SpeechEngine};
pub use worker::spawn_workers;
