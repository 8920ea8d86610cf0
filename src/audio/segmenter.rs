//! # Sliding-Window Segmenter
//!
//! Accumulates normalized samples into a rolling buffer and cuts
//! fixed-length inference windows from it. Consecutive windows start
//! `stride` samples apart, so a stride shorter than the window length
//! produces overlapping windows; the overlap gives the recognizer context
//! across window boundaries.
//!
//! After a stream of L samples (L >= W), the segmenter has emitted
//! floor((L - W) / S) + 1 windows, and the internal buffer never holds more
//! than one window length plus the most recent frame.

use std::str::FromStr;

use anyhow::anyhow;

/// How a session sheds load when transcription can't keep up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureMode {
    /// Enqueue every window; the dispatch queue evicts its oldest entry
    /// when full. Transcription always sees the freshest audio.
    EvictOldest,
    /// When the queue is full, skip the enqueue and truncate the rolling
    /// buffer to the last window length, discarding stale middle audio.
    TruncateOnBusy,
}

impl FromStr for BackpressureMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evict-oldest" => Ok(Self::EvictOldest),
            "truncate-on-busy" => Ok(Self::TruncateOnBusy),
            other => Err(anyhow!(
                "Unknown backpressure mode '{}' (expected 'evict-oldest' or 'truncate-on-busy')",
                other
            )),
        }
    }
}

/// One fixed-length window of audio handed to a transcription worker.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// Monotonic per-session window counter.
    pub sequence: u64,
    /// Offset of the window's first sample from the session start.
    pub start_sample: u64,
    pub samples: Vec<f32>,
}

impl AudioWindow {
    pub fn start_secs(&self, sample_rate: u32) -> f64 {
        self.start_sample as f64 / sample_rate as f64
    }
}

pub struct Segmenter {
    window_samples: usize,
    stride_samples: usize,
    buffer: Vec<f32>,
    /// Session-start offset of buffer[0].
    buffer_start: u64,
    next_sequence: u64,
}

impl Segmenter {
    pub fn new(window_samples: usize, stride_samples: usize) -> Self {
        debug_assert!(stride_samples > 0 && stride_samples <= window_samples);
        Self {
            window_samples,
            stride_samples,
            buffer: Vec::with_capacity(window_samples * 2),
            buffer_start: 0,
            next_sequence: 0,
        }
    }

    /// Feed one frame of samples; returns every window that became complete.
    ///
    /// A frame longer than the stride can complete several windows at once,
    /// so this drains the buffer in a loop rather than emitting at most one.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioWindow> {
        self.buffer.extend_from_slice(samples);

        let mut windows = Vec::new();
        while self.buffer.len() >= self.window_samples {
            windows.push(AudioWindow {
                sequence: self.next_sequence,
                start_sample: self.buffer_start,
                samples: self.buffer[..self.window_samples].to_vec(),
            });
            self.next_sequence += 1;

            self.buffer.drain(..self.stride_samples);
            self.buffer_start += self.stride_samples as u64;
        }

        windows
    }

    /// Discard everything but the most recent window length of audio.
    ///
    /// Used by truncate-on-busy sessions when the dispatch queue is full:
    /// the freshest audio is kept so the next emitted window reflects what
    /// the speaker just said.
    pub fn truncate_to_window(&mut self) {
        if self.buffer.len() > self.window_samples {
            let excess = self.buffer.len() - self.window_samples;
            self.buffer.drain(..excess);
            self.buffer_start += excess as u64;
        }
    }

    /// Samples currently buffered (pending, not yet part of a full window).
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 100;
    const S: usize = 80;

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_no_window_until_full() {
        let mut seg = Segmenter::new(W, S);
        assert!(seg.push(&ramp(0, W - 1)).is_empty());
        let windows = seg.push(&ramp(W - 1, 1));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].samples.len(), W);
        assert_eq!(windows[0].start_sample, 0);
    }

    #[test]
    fn test_window_count_for_long_stream() {
        let mut seg = Segmenter::new(W, S);
        let total = 1000usize;
        let mut count = 0;
        // Feed in uneven frame sizes
        for chunk in ramp(0, total).chunks(37) {
            count += seg.push(chunk).len();
        }
        // floor((L - W) / S) + 1
        assert_eq!(count, (total - W) / S + 1);
    }

    #[test]
    fn test_start_sample_advances_by_stride() {
        let mut seg = Segmenter::new(W, S);
        let windows = seg.push(&ramp(0, W + 3 * S));
        assert_eq!(windows.len(), 4);
        for (i, window) in windows.iter().enumerate() {
            assert_eq!(window.start_sample, (i * S) as u64);
            assert_eq!(window.sequence, i as u64);
        }
    }

    #[test]
    fn test_overlap_region_is_identical() {
        let mut seg = Segmenter::new(W, S);
        let windows = seg.push(&ramp(0, W + S));
        assert_eq!(windows.len(), 2);

        let overlap = W - S;
        assert_eq!(
            windows[0].samples[S..],
            windows[1].samples[..overlap]
        );
    }

    #[test]
    fn test_buffer_stays_bounded() {
        let mut seg = Segmenter::new(W, S);
        let frame = ramp(0, 33);
        for _ in 0..200 {
            seg.push(&frame);
            assert!(seg.buffered_len() < W + frame.len());
        }
    }

    #[test]
    fn test_one_frame_can_complete_many_windows() {
        let mut seg = Segmenter::new(W, S);
        let windows = seg.push(&ramp(0, W + 5 * S));
        assert_eq!(windows.len(), 6);
    }

    #[test]
    fn test_truncate_keeps_freshest_audio() {
        let mut seg = Segmenter::new(W, W); // no overlap
        seg.push(&ramp(0, W - 10));
        seg.push(&ramp(0, W - 10)); // 2W - 20 buffered minus one emitted window
        seg.truncate_to_window();
        assert!(seg.buffered_len() <= W);

        // Next window starts where the truncated buffer starts
        let windows = seg.push(&ramp(0, W));
        assert!(!windows.is_empty());
    }

    #[test]
    fn test_start_secs_conversion() {
        let window = AudioWindow {
            sequence: 0,
            start_sample: 24000,
            samples: Vec::new(),
        };
        assert!((window.start_secs(16000) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_backpressure_mode_parsing() {
        assert_eq!(
            "evict-oldest".parse::<BackpressureMode>().unwrap(),
            BackpressureMode::EvictOldest
        );
        assert_eq!(
            "truncate-on-busy".parse::<BackpressureMode>().unwrap(),
            BackpressureMode::TruncateOnBusy
        );
        assert!("drop-all".parse::<BackpressureMode>().is_err());
    }
}
