//! Core types for the Vanta assistant
//!
//! This crate provides foundational types used across all other crates:
//! - Media frame types (PCM audio chunks, still images)
//! - PCM sample conversion helpers
//! - The top-level error type

pub mod audio;
pub mod error;

pub use audio::{
    pcm_to_f32, pcm_to_i16, AudioChunk, ImageFrame, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use error::{Error, Result};
