//! # Speech Engine Abstraction
//!
//! Trait boundary between the streaming pipeline and whatever recognizer
//! backs it. Engines are synchronous and CPU-bound; workers call them
//! through `spawn_blocking` so inference never stalls the async runtime.
//!
//! The server ships with `NullEngine`, which recognizes nothing but lets
//! the full pipeline run without a model on disk. Real backends implement
//! `SpeechEngine` and register in `build_engine`.

use std::sync::Arc;

use anyhow::Result;

use crate::config::EngineConfig;

/// Decode parameters for a single window.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub language: String,
    pub beam_size: usize,
    pub temperature: f32,
    pub no_speech_threshold: f32,
    /// Rolling hint of recently finalized text, used to bias decoding
    /// across window boundaries. Empty when conditioning is disabled.
    pub previous_text: Option<String>,
}

impl TranscribeRequest {
    pub fn from_config(config: &EngineConfig, previous_text: Option<String>) -> Self {
        Self {
            language: config.language.clone(),
            beam_size: config.beam_size,
            temperature: config.temperature,
            no_speech_threshold: config.no_speech_threshold,
            previous_text: if config.condition_on_previous_text {
                previous_text
            } else {
                None
            },
        }
    }
}

/// One recognized segment within a window. Offsets are seconds relative to
/// the window start; the worker pairs the set with the window's position in
/// the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start: f32,
    pub end: f32,
    /// Probability the segment is silence or non-speech noise.
    pub no_speech_prob: f32,
}

/// A speech recognizer that turns a window of samples into text segments.
///
/// Implementations must be `Send + Sync`; one engine instance is shared by
/// every session's workers.
pub trait SpeechEngine: Send + Sync {
    fn transcribe(&self, samples: &[f32], request: &TranscribeRequest) -> Result<Vec<Segment>>;

    fn name(&self) -> &str;
}

impl<T: SpeechEngine + ?Sized> SpeechEngine for Arc<T> {
    fn transcribe(&self, samples: &[f32], request: &TranscribeRequest) -> Result<Vec<Segment>> {
        (**self).transcribe(samples, request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Placeholder engine that recognizes every window as silence.
pub struct NullEngine;

impl SpeechEngine for NullEngine {
    fn transcribe(&self, _samples: &[f32], _request: &TranscribeRequest) -> Result<Vec<Segment>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Instantiate the configured engine backend.
pub fn build_engine(config: &EngineConfig) -> Result<Arc<dyn SpeechEngine>> {
    match config.backend.as_str() {
        "null" => Ok(Arc::new(NullEngine)),
        other => Err(anyhow::anyhow!("Unknown engine backend '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_engine_recognizes_nothing() {
        let engine = NullEngine;
        let request = TranscribeRequest::from_config(&EngineConfig {
            backend: "null".to_string(),
            language: "ko".to_string(),
            beam_size: 1,
            temperature: 0.0,
            no_speech_threshold: 0.6,
            condition_on_previous_text: true,
        }, None);

        let segments = engine.transcribe(&[0.0; 160], &request).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_conditioning_disabled_drops_hint() {
        let config = EngineConfig {
            backend: "null".to_string(),
            language: "ko".to_string(),
            beam_size: 1,
            temperature: 0.0,
            no_speech_threshold: 0.6,
            condition_on_previous_text: false,
        };
        let request = TranscribeRequest::from_config(&config, Some("hello".to_string()));
        assert!(request.previous_text.is_none());
    }

    #[test]
    fn test_build_engine_rejects_unknown_backend() {
        let mut config = crate::config::AppConfig::default().engine;
        config.backend = "imaginary".to_string();
        assert!(build_engine(&config).is_err());
    }
}
