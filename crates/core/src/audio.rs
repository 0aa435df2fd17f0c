//! Media frame types and PCM helpers
//!
//! All audio in the core is signed 16-bit little-endian mono PCM:
//! 16 kHz on the capture path, 24 kHz on the playback path. Frames are
//! ephemeral and never persisted.

use serde::{Deserialize, Serialize};

/// Sample rate of microphone audio sent to the model.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of model audio rendered by the player.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// One chunk of s16le mono PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Raw sample bytes (2 bytes per sample, little-endian).
    pub data: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a capture-side chunk (16 kHz).
    pub fn input(data: Vec<u8>) -> Self {
        Self {
            data,
            sample_rate: INPUT_SAMPLE_RATE,
        }
    }

    /// Create a playback-side chunk (24 kHz).
    pub fn output(data: Vec<u8>) -> Self {
        Self {
            data,
            sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }

    /// Number of whole samples in the chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Duration of the chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.sample_count() as u64 * 1000) / self.sample_rate as u64
    }
}

/// One compressed still image with its declared media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFrame {
    /// Compressed image bytes.
    pub data: Vec<u8>,
    /// Declared MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
}

impl ImageFrame {
    /// Create a JPEG frame.
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            data,
            mime_type: "image/jpeg".to_string(),
        }
    }
}

/// Convert s16le PCM bytes to normalized f32 samples in [-1, 1).
///
/// A trailing odd byte is ignored.
pub fn pcm_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

/// Convert s16le PCM bytes to i16 samples.
pub fn pcm_to_i16(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
