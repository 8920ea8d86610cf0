//! HTTP API handlers.

pub mod config;
pub mod metrics;
pub mod sessions;
