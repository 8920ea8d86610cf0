//! # Frame Normalizer
//!
//! Converts raw binary audio frames from the client into normalized float
//! samples for the segmenter. Clients send 16-bit little-endian signed mono
//! PCM; each sample is scaled into [-1.0, 1.0] by dividing by 32768.
//!
//! Two optional conditioning steps run per frame:
//! - DC offset removal (subtract the frame mean)
//! - Peak normalization (rescale by the frame's peak amplitude)
//!
//! Both operate on the frame in isolation; no state carries across frames.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::AppError;

/// Scale factor for i16 PCM to float conversion.
const PCM_SCALE: f32 = 32768.0;

/// Peaks below this are treated as silence and left unscaled.
const PEAK_FLOOR: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct FrameNormalizer {
    remove_dc_offset: bool,
    peak_normalize: bool,
}

impl FrameNormalizer {
    pub fn new(remove_dc_offset: bool, peak_normalize: bool) -> Self {
        Self {
            remove_dc_offset,
            peak_normalize,
        }
    }

    /// Decode one binary frame into normalized f32 samples.
    ///
    /// Frames must contain an even number of bytes (whole i16 samples);
    /// odd-length frames are rejected rather than silently truncated so a
    /// misaligned client stream surfaces immediately.
    pub fn normalize(&self, frame: &[u8]) -> Result<Vec<f32>, AppError> {
        if frame.len() % 2 != 0 {
            return Err(AppError::BadRequest(format!(
                "Audio frame has odd byte length {}, expected whole 16-bit samples",
                frame.len()
            )));
        }

        let mut samples: Vec<f32> = frame
            .chunks_exact(2)
            .map(|pair| LittleEndian::read_i16(pair) as f32 / PCM_SCALE)
            .collect();

        if samples.is_empty() {
            return Ok(samples);
        }

        if self.remove_dc_offset {
            let mean: f32 = samples.iter().sum::<f32>() / samples.len() as f32;
            for sample in samples.iter_mut() {
                *sample -= mean;
            }
        }

        if self.peak_normalize {
            let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            if peak > PEAK_FLOOR {
                for sample in samples.iter_mut() {
                    *sample /= peak;
                }
            }
        }

        Ok(samples)
    }
}
