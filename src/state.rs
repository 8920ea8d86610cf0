//! # Application State Management
//!
//! Shared state accessible across all requests and WebSocket sessions. The
//! state is wrapped in `Arc<RwLock<...>>` so many readers (metrics reporting,
//! config reads) can proceed concurrently while writers (config updates,
//! session registration) take brief exclusive access.
//!
//! ## Contents:
//! - **config**: The active application configuration
//! - **metrics**: Request counters and per-endpoint statistics
//! - **sessions**: Registry of live transcription sessions

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::AppConfig;

/// Aggregate request metrics for the whole process.
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub windows_dispatched: u64,
    pub windows_dropped: u64,
    pub events_emitted: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            windows_dispatched: 0,
            windows_dropped: 0,
            events_emitted: 0,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-endpoint request statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointMetrics {
    pub count: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl EndpointMetrics {
    pub fn record(&mut self, duration_ms: u64) {
        self.count += 1;
        self.total_duration_ms += duration_ms;
        if duration_ms > self.max_duration_ms {
            self.max_duration_ms = duration_ms;
        }
    }

    pub fn avg_duration_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_duration_ms / self.count
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self {
            count: 0,
            total_duration_ms: 0,
            max_duration_ms: 0,
        }
    }
}

/// A live transcription session as seen by the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub speaker_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub frames_received: u64,
    pub windows_emitted: u64,
}

/// Shared application state.
pub struct AppState {
    pub config: AppConfig,
    pub metrics: Metrics,
    pub endpoint_metrics: HashMap<String, EndpointMetrics>,
    pub sessions: HashMap<String, SessionInfo>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            metrics: Metrics::new(),
            endpoint_metrics: HashMap::new(),
            sessions: HashMap::new(),
            start_time: Utc::now(),
        }
    }

    /// Register a new session if capacity allows. Returns false when the
    /// process is already at `max_concurrent_sessions`.
    pub fn register_session(&mut self, session_id: String) -> bool {
        if self.sessions.len() >= self.config.performance.max_concurrent_sessions {
            return false;
        }
        self.sessions.insert(
            session_id.clone(),
            SessionInfo {
                session_id,
                speaker_id: None,
                connected_at: Utc::now(),
                frames_received: 0,
                windows_emitted: 0,
            },
        );
        true
    }

    pub fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Re-key an already registered session. The old slot is reused, so
    /// this never fails on capacity, and the counters carry over.
    pub fn rename_session(&mut self, old_id: &str, new_id: String, speaker_id: Option<String>) {
        let mut info = self.sessions.remove(old_id).unwrap_or(SessionInfo {
            session_id: new_id.clone(),
            speaker_id: None,
            connected_at: Utc::now(),
            frames_received: 0,
            windows_emitted: 0,
        });
        info.session_id = new_id.clone();
        if speaker_id.is_some() {
            info.speaker_id = speaker_id;
        }
        self.sessions.insert(new_id, info);
    }

    pub fn record_endpoint(&mut self, path: &str, duration_ms: u64) {
        self.endpoint_metrics
            .entry(path.to_string())
            .or_default()
            .record(duration_ms);
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
