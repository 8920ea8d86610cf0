//! # Session Pipeline
//!
//! Per-connection glue between the WebSocket actor and the transcription
//! workers. Each connection owns one pipeline: incoming binary frames are
//! normalized, segmented into windows, and dispatched to the session's
//! queue under the configured backpressure mode.
//!
//! The pipeline is deliberately actix-free so windowing and backpressure
//! behavior can be tested without a running actor system.

use std::sync::Arc;

use tracing::debug;

use crate::config::AppConfig;
use crate::error::AppError;

use super::normalizer::FrameNormalizer;
use super::queue::DispatchQueue;
use super::segmenter::{BackpressureMode, Segmenter};

/// Outcome of ingesting a single frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub windows_dispatched: u64,
    pub windows_dropped: u64,
}

pub struct SessionPipeline {
    normalizer: FrameNormalizer,
    segmenter: Segmenter,
    queue: Arc<DispatchQueue>,
    backpressure: BackpressureMode,
    session_id: String,
}

impl SessionPipeline {
    pub fn new(
        config: &AppConfig,
        queue: Arc<DispatchQueue>,
        backpressure: BackpressureMode,
        session_id: String,
    ) -> Self {
        Self {
            normalizer: FrameNormalizer::new(
                config.audio.remove_dc_offset,
                config.audio.peak_normalize,
            ),
            segmenter: Segmenter::new(
                config.audio.window_samples(),
                config.audio.stride_samples(),
            ),
            queue,
            backpressure,
            session_id,
        }
    }

    /// Normalize one binary frame and dispatch any completed windows.
    pub fn ingest_frame(&mut self, frame: &[u8]) -> Result<IngestStats, AppError> {
        let samples = self.normalizer.normalize(frame)?;
        let mut stats = IngestStats::default();

        // In truncate-on-busy mode a full queue means the workers are
        // behind; drop stale buffered audio instead of queueing more.
        if self.backpressure == BackpressureMode::TruncateOnBusy && self.queue.is_full() {
            self.segmenter.truncate_to_window();
        }

        for window in self.segmenter.push(&samples) {
            let sequence = window.sequence;
            match self.backpressure {
                BackpressureMode::EvictOldest => {
                    if let Some(evicted) = self.queue.put(window) {
                        debug!(
                            session_id = %self.session_id,
                            evicted_sequence = evicted.sequence,
                            "Dispatch queue full, evicted oldest window"
                        );
                        stats.windows_dropped += 1;
                    }
                    stats.windows_dispatched += 1;
                }
                BackpressureMode::TruncateOnBusy => {
                    if self.queue.is_full() {
                        debug!(
                            session_id = %self.session_id,
                            sequence,
                            "Dispatch queue busy, dropping window"
                        );
                        stats.windows_dropped += 1;
                    } else {
                        self.queue.put(window);
                        stats.windows_dispatched += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Close the dispatch queue; workers drain out and exit.
    pub fn shutdown(&self) {
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        // 10-sample windows with 8-sample stride at a tiny rate keeps
        // test frames small
        config.audio.sample_rate = 1000;
        config.audio.window_ms = 10;
        config.audio.stride_ms = 8;
        config.audio.remove_dc_offset = false;
        config.audio.peak_normalize = false;
        config
    }

    fn frame_of(samples: usize) -> Vec<u8> {
        let pcm: Vec<i16> = (0..samples).map(|i| i as i16).collect();
        let mut bytes = vec![0u8; pcm.len() * 2];
        LittleEndian::write_i16_into(&pcm, &mut bytes);
        bytes
    }

    #[test]
    fn test_frames_become_windows() {
        let config = test_config();
        let queue = Arc::new(DispatchQueue::new(4));
        let mut pipeline = SessionPipeline::new(
            &config,
            Arc::clone(&queue),
            BackpressureMode::EvictOldest,
            "s1".to_string(),
        );

        // 26 samples -> floor((26 - 10) / 8) + 1 = 3 windows
        let stats = pipeline.ingest_frame(&frame_of(26)).unwrap();
        assert_eq!(stats.windows_dispatched, 3);
        assert_eq!(stats.windows_dropped, 0);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_evict_oldest_counts_drops() {
        let config = test_config();
        let queue = Arc::new(DispatchQueue::new(1));
        let mut pipeline = SessionPipeline::new(
            &config,
            Arc::clone(&queue),
            BackpressureMode::EvictOldest,
            "s1".to_string(),
        );

        let stats = pipeline.ingest_frame(&frame_of(26)).unwrap();
        assert_eq!(stats.windows_dispatched, 3);
        assert_eq!(stats.windows_dropped, 2);
        // Freshest window survived
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_truncate_on_busy_skips_enqueue() {
        let config = test_config();
        let queue = Arc::new(DispatchQueue::new(1));
        let mut pipeline = SessionPipeline::new(
            &config,
            Arc::clone(&queue),
            BackpressureMode::TruncateOnBusy,
            "s1".to_string(),
        );

        let stats = pipeline.ingest_frame(&frame_of(26)).unwrap();
        assert_eq!(stats.windows_dispatched, 1);
        assert_eq!(stats.windows_dropped, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_malformed_frame_propagates_error() {
        let config = test_config();
        let queue = Arc::new(DispatchQueue::new(1));
        let mut pipeline = SessionPipeline::new(
            &config,
            queue,
            BackpressureMode::EvictOldest,
            "s1".to_string(),
        );

        assert!(pipeline.ingest_frame(&[0x01]).is_err());
    }

    #[test]
    fn test_shutdown_closes_queue() {
        let config = test_config();
        let queue = Arc::new(DispatchQueue::new(1));
        let pipeline = SessionPipeline::new(
            &config,
            Arc::clone(&queue),
            BackpressureMode::EvictOldest,
            "s1".to_string(),
        );

        pipeline.shutdown();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert!(queue.take().await.is_none());
        });
    }
}
