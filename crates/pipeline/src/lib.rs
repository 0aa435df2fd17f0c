//! Real-time pipeline for the Vanta assistant
//!
//! This crate provides the client-side media pipeline:
//! - Voice activity detection over captured PCM (Silero-style model)
//! - Streaming playback of model audio with barge-in semantics
//! - Capture source interfaces (camera, microphone)
//! - The coordinator state machine tying it all to the live session

pub mod coordinator;
#[cfg(feature = "playback")]
pub mod device;
pub mod player;
pub mod prompts;
pub mod sources;
pub mod vad;

pub use coordinator::{derive_state, AssistantState, Coordinator};
pub use player::{NullBackend, OutputBackend, OutputSpec, StreamingPlayer};
pub use prompts::AssistantMode;
pub use sources::{CameraSource, ChannelCamera, ChannelMicrophone, MicrophoneSource};
pub use vad::{EnergyModel, SpeechDetector, SpeechModel, VadConfig, VadEngine, VadEvent};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Playback error: {0}")]
    Player(String),

    #[error("Capture source error: {0}")]
    Source(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Assistant already running")]
    AlreadyRunning,

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for vanta_core::Error {
    fn from(err: PipelineError) -> Self {
        vanta_core::Error::Pipeline(err.to_string())
    }
}
