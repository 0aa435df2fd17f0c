//! Capture source interfaces
//!
//! Platform camera and microphone drivers live outside the core; the
//! coordinator consumes them through these traits. Sources own their
//! capture rate and formats: images are compressed stills, microphone
//! chunks are s16le mono 16 kHz of roughly 100 ms each.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use vanta_core::{AudioChunk, ImageFrame};

use crate::PipelineError;

/// A hot stream of compressed camera frames.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Begin capture. Frames arrive on the returned channel at the
    /// source-controlled rate.
    async fn start(&self) -> Result<mpsc::Receiver<ImageFrame>, PipelineError>;

    /// Stop capture and release the device.
    async fn stop(&self);
}

/// A hot stream of microphone PCM chunks.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Begin capture.
    async fn start(&self) -> Result<mpsc::Receiver<AudioChunk>, PipelineError>;

    /// Stop capture and release the device.
    async fn stop(&self);
}

/// Channel-backed camera source for embedders that push frames from
/// platform capture callbacks (and for tests).
pub struct ChannelCamera {
    receiver: Mutex<Option<mpsc::Receiver<ImageFrame>>>,
}

impl ChannelCamera {
    /// Returns the push side and the source.
    pub fn new(capacity: usize) -> (mpsc::Sender<ImageFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                receiver: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl CameraSource for ChannelCamera {
    async fn start(&self) -> Result<mpsc::Receiver<ImageFrame>, PipelineError> {
        self.receiver
            .lock()
            .take()
            .ok_or_else(|| PipelineError::Source("camera already started".to_string()))
    }

    async fn stop(&self) {}
}

/// Channel-backed microphone source, the audio counterpart of
/// [`ChannelCamera`].
pub struct ChannelMicrophone {
    receiver: Mutex<Option<mpsc::Receiver<AudioChunk>>>,
}

impl ChannelMicrophone {
    pub fn new(capacity: usize) -> (mpsc::Sender<AudioChunk>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                receiver: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl MicrophoneSource for ChannelMicrophone {
    async fn start(&self) -> Result<mpsc::Receiver<AudioChunk>, PipelineError> {
        self.receiver
            .lock()
            .take()
            .ok_or_else(|| PipelineError::Source("microphone already started".to_string()))
    }

    async fn stop(&self) {}
}
