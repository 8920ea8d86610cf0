//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The audio/dispatch/stabilizer sections parameterize the streaming
//! pipeline; they are validated together so a session can never be wired
//! with, say, a stride longer than its window.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::audio::segmenter::BackpressureMode;
use crate::stabilize::stabilizer::StabilizerMode;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
    pub stabilizer: StabilizerConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// When true, outbound events are JSON `{type, text}` messages; when
    /// false, plain text with a leading `~` marking provisional fragments.
    pub structured_events: bool,
}

/// Inbound audio format and normalization settings.
///
/// Clients send 16-bit little-endian mono PCM at `sample_rate`; the window
/// and stride lengths (milliseconds) drive the sliding-window segmenter.
/// A stride below the window length yields overlapping windows, which
/// improves recognizer accuracy at window boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub window_ms: u32,
    pub stride_ms: u32,

    /// Subtract each frame's mean before scaling (removes DC offset).
    pub remove_dc_offset: bool,

    /// Rescale each frame by its peak amplitude (compensates for variable
    /// microphone gain across client devices).
    pub peak_normalize: bool,
}

impl AudioConfig {
    /// Window length in samples.
    pub fn window_samples(&self) -> usize {
        (self.window_ms as usize * self.sample_rate as usize) / 1000
    }

    /// Stride length in samples.
    pub fn stride_samples(&self) -> usize {
        (self.stride_ms as usize * self.sample_rate as usize) / 1000
    }
}

/// Dispatch queue and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Window queue capacity per session (observed deployments use 1-4).
    pub queue_capacity: usize,

    /// Transcription workers per session. One worker serializes windows;
    /// more accept out-of-order completion for lower latency.
    pub workers_per_session: usize,

    /// Backpressure discipline: "evict-oldest" or "truncate-on-busy".
    pub backpressure: String,
}

impl DispatchConfig {
    pub fn backpressure_mode(&self) -> Result<BackpressureMode> {
        self.backpressure.parse()
    }
}

/// Parameters passed to the speech engine on every window.
///
/// These mirror the knobs of segment-based recognizers: a language hint,
/// decoding beam width, determinism temperature, silence sensitivity, and
/// whether to bias decoding with the rolling previous-text hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine backend name ("null" ships with the server; real recognizer
    /// backends register here).
    pub backend: String,
    pub language: String,
    pub beam_size: usize,
    pub temperature: f32,
    pub no_speech_threshold: f32,
    pub condition_on_previous_text: bool,
}

/// Stabilization and correction layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizerConfig {
    /// "confidence" (counter-based partial/final promotion) or "diff"
    /// (token common-prefix diffing).
    pub mode: String,

    /// Observations required before a fragment is emitted as final.
    pub stability_threshold: u64,

    /// Fragments whose no-speech score exceeds this are never counted.
    pub no_speech_ceiling: f32,

    /// Minimum similarity for fuzzy substitution from the store.
    pub similarity_threshold: f64,

    /// How many top records to consult for fuzzy correction.
    pub correction_top_k: usize,

    /// Fragments with fewer non-whitespace characters are forwarded as
    /// provisional but never counted toward stability.
    pub min_fragment_chars: usize,

    /// SQLite path for the correction store; empty means in-memory.
    pub store_path: String,
}

impl StabilizerConfig {
    pub fn stabilizer_mode(&self) -> Result<StabilizerMode> {
        self.mode.parse()
    }
}

/// Process-level capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                structured_events: true,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                window_ms: 1200, // 1.2s inference windows
                stride_ms: 1000, // 200ms overlap between windows
                remove_dc_offset: true,
                peak_normalize: true,
            },
            dispatch: DispatchConfig {
                queue_capacity: 2,
                workers_per_session: 1,
                backpressure: "evict-oldest".to_string(),
            },
            engine: EngineConfig {
                backend: "null".to_string(),
                language: "ko".to_string(),
                beam_size: 1,
                temperature: 0.0,
                no_speech_threshold: 0.6,
                condition_on_previous_text: true,
            },
            stabilizer: StabilizerConfig {
                mode: "confidence".to_string(),
                stability_threshold: 3,
                no_speech_ceiling: 0.6,
                similarity_threshold: 0.75,
                correction_top_k: 50,
                min_fragment_chars: 3,
                store_path: String::new(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// Bare HOST/PORT variables (deployment platforms set these without the
    /// APP_ prefix) override the server section last.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        // The segmenter works in samples; a ms value that rounds to zero
        // samples at this sample rate must be rejected here.
        if self.audio.window_samples() == 0 {
            return Err(anyhow::anyhow!(
                "Window of {}ms is shorter than one sample at {}Hz",
                self.audio.window_ms,
                self.audio.sample_rate
            ));
        }

        if self.audio.stride_samples() == 0 {
            return Err(anyhow::anyhow!(
                "Stride of {}ms is shorter than one sample at {}Hz",
                self.audio.stride_ms,
                self.audio.sample_rate
            ));
        }

        if self.audio.stride_samples() > self.audio.window_samples() {
            return Err(anyhow::anyhow!(
                "Stride ({}ms) must not exceed the window length ({}ms)",
                self.audio.stride_ms,
                self.audio.window_ms
            ));
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(anyhow::anyhow!("Dispatch queue capacity must be at least 1"));
        }

        if self.dispatch.workers_per_session == 0 {
            return Err(anyhow::anyhow!("Workers per session must be at least 1"));
        }

        // Parse failures surface here rather than at session start
        self.dispatch.backpressure_mode()?;
        self.stabilizer.stabilizer_mode()?;

        if self.stabilizer.stability_threshold == 0 {
            return Err(anyhow::anyhow!("Stability threshold must be at least 1"));
        }

        if !(0.0..=1.0).contains(&self.stabilizer.similarity_threshold)
            || self.stabilizer.similarity_threshold == 0.0
        {
            return Err(anyhow::anyhow!(
                "Similarity threshold must be in (0.0, 1.0], got {}",
                self.stabilizer.similarity_threshold
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON string (runtime config endpoint).
    ///
    /// Only the fields present in the JSON are touched; the updated
    /// configuration is re-validated before being accepted. Sessions pick up
    /// the new values on their next connection; live sessions keep the
    /// parameters they were wired with.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
            if let Some(structured) = server.get("structured_events").and_then(|v| v.as_bool()) {
                self.server.structured_events = structured;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(window) = audio.get("window_ms").and_then(|v| v.as_u64()) {
                self.audio.window_ms = window as u32;
            }
            if let Some(stride) = audio.get("stride_ms").and_then(|v| v.as_u64()) {
                self.audio.stride_ms = stride as u32;
            }
            if let Some(dc) = audio.get("remove_dc_offset").and_then(|v| v.as_bool()) {
                self.audio.remove_dc_offset = dc;
            }
            if let Some(peak) = audio.get("peak_normalize").and_then(|v| v.as_bool()) {
                self.audio.peak_normalize = peak;
            }
        }

        if let Some(dispatch) = partial.get("dispatch") {
            if let Some(capacity) = dispatch.get("queue_capacity").and_then(|v| v.as_u64()) {
                self.dispatch.queue_capacity = capacity as usize;
            }
            if let Some(workers) = dispatch.get("workers_per_session").and_then(|v| v.as_u64()) {
                self.dispatch.workers_per_session = workers as usize;
            }
            if let Some(mode) = dispatch.get("backpressure").and_then(|v| v.as_str()) {
                self.dispatch.backpressure = mode.to_string();
            }
        }

        if let Some(stabilizer) = partial.get("stabilizer") {
            if let Some(mode) = stabilizer.get("mode").and_then(|v| v.as_str()) {
                self.stabilizer.mode = mode.to_string();
            }
            if let Some(threshold) = stabilizer.get("stability_threshold").and_then(|v| v.as_u64())
            {
                self.stabilizer.stability_threshold = threshold;
            }
            if let Some(similarity) = stabilizer
                .get("similarity_threshold")
                .and_then(|v| v.as_f64())
            {
                self.stabilizer.similarity_threshold = similarity;
            }
            if let Some(top_k) = stabilizer.get("correction_top_k").and_then(|v| v.as_u64()) {
                self.stabilizer.correction_top_k = top_k as usize;
            }
        }

        if let Some(engine) = partial.get("engine") {
            if let Some(language) = engine.get("language").and_then(|v| v.as_str()) {
                self.engine.language = language.to_string();
            }
            if let Some(beam) = engine.get("beam_size").and_then(|v| v.as_u64()) {
                self.engine.beam_size = beam as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
