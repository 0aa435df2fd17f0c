//! Streaming audio player
//!
//! Renders model PCM with minimal latency. Chunks are queued FIFO and
//! pulled by the output device callback; `pause` suspends consumption
//! and `flush` atomically empties everything so barge-in can cut the
//! model off mid-sentence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use vanta_core::{pcm_to_i16, OUTPUT_SAMPLE_RATE};

use crate::PipelineError;

/// Output stream parameters handed to the backend.
#[derive(Debug, Clone, Copy)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Callback the device invokes to pull rendered samples.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Platform output device abstraction.
pub trait OutputBackend: Send {
    /// Open the device and start invoking `render` for output buffers.
    fn open(&mut self, spec: OutputSpec, render: RenderFn) -> Result<(), PipelineError>;

    /// Suspend the device.
    fn pause(&mut self) -> Result<(), PipelineError>;

    /// Resume the device.
    fn resume(&mut self) -> Result<(), PipelineError>;

    /// Release the device.
    fn close(&mut self);
}

/// Discards all output. Used for headless builds and tests.
#[derive(Debug, Default)]
pub struct NullBackend;

impl OutputBackend for NullBackend {
    fn open(&mut self, _spec: OutputSpec, _render: RenderFn) -> Result<(), PipelineError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Queue state shared with the device callback. One lock covers both
/// enqueue and render so `flush` is atomic with respect to either side.
struct PlayQueue {
    chunks: VecDeque<Vec<i16>>,
    /// Consumed samples in the front chunk
    offset: usize,
    paused: bool,
}

impl PlayQueue {
    fn queued_samples(&self) -> usize {
        let total: usize = self.chunks.iter().map(|c| c.len()).sum();
        total - self.offset
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.offset = 0;
    }

    fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let remaining = &front[self.offset..];
            let take = remaining.len().min(out.len() - written);
            for (dst, &sample) in out[written..written + take].iter_mut().zip(remaining) {
                *dst = sample as f32 / 32768.0;
            }
            written += take;
            self.offset += take;
            if self.offset >= front.len() {
                self.chunks.pop_front();
                self.offset = 0;
            }
        }
        written
    }
}

/// Streaming PCM player for 24 kHz mono model audio.
pub struct StreamingPlayer {
    queue: Arc<Mutex<PlayQueue>>,
    playing_tx: watch::Sender<bool>,
    backend: Mutex<Box<dyn OutputBackend>>,
    opened: AtomicBool,
}

impl StreamingPlayer {
    /// Player over the platform output device.
    #[cfg(feature = "playback")]
    pub fn new() -> Self {
        Self::with_backend(Box::new(crate::device::CpalBackend::new()))
    }

    /// Without the playback feature output is discarded.
    #[cfg(not(feature = "playback"))]
    pub fn new() -> Self {
        Self::with_backend(Box::<NullBackend>::default())
    }

    /// Player over an explicit backend.
    pub fn with_backend(backend: Box<dyn OutputBackend>) -> Self {
        let (playing_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(Mutex::new(PlayQueue {
                chunks: VecDeque::new(),
                offset: 0,
                paused: false,
            })),
            playing_tx,
            backend: Mutex::new(backend),
            opened: AtomicBool::new(false),
        }
    }

    /// Open the output device. Idempotent; also called lazily by the
    /// first `enqueue`.
    pub fn initialize(&self) -> Result<(), PipelineError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let queue = self.queue.clone();
        let playing_tx = self.playing_tx.clone();
        let render: RenderFn = Box::new(move |out| {
            render_into(&queue, &playing_tx, out);
        });

        let spec = OutputSpec {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        };
        if let Err(e) = self.backend.lock().open(spec, render) {
            self.opened.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Append a chunk of s16le PCM to the playback queue.
    pub fn enqueue(&self, pcm: &[u8]) -> Result<(), PipelineError> {
        self.initialize()?;

        let samples = pcm_to_i16(pcm);
        if samples.is_empty() {
            return Ok(());
        }

        let mut queue = self.queue.lock();
        queue.chunks.push_back(samples);
        if !queue.paused {
            self.playing_tx.send_replace(true);
        }
        Ok(())
    }

    /// Suspend consumption. Queued data is retained.
    pub fn pause(&self) {
        self.queue.lock().paused = true;
        if let Err(e) = self.backend.lock().pause() {
            tracing::warn!("failed to pause output device: {}", e);
        }
        self.playing_tx.send_replace(false);
    }

    /// Reverse a `pause`.
    pub fn resume(&self) {
        let has_data = {
            let mut queue = self.queue.lock();
            queue.paused = false;
            queue.queued_samples() > 0
        };
        if let Err(e) = self.backend.lock().resume() {
            tracing::warn!("failed to resume output device: {}", e);
        }
        if has_data {
            self.playing_tx.send_replace(true);
        }
    }

    /// Drop everything queued. After this returns, no chunk enqueued
    /// before the call will ever be rendered. Safe to call while paused.
    pub fn flush(&self) {
        self.queue.lock().clear();
        self.playing_tx.send_replace(false);
    }

    /// Stop rendering and release the device.
    pub fn release(&self) {
        self.backend.lock().close();
        self.opened.store(false, Ordering::SeqCst);
        self.flush();
    }

    /// Watch whether audio is currently being rendered.
    pub fn is_playing(&self) -> watch::Receiver<bool> {
        self.playing_tx.subscribe()
    }

    /// Current playing flag.
    pub fn playing_now(&self) -> bool {
        *self.playing_tx.borrow()
    }

    /// Pull rendered samples the way a device callback would. Lets
    /// embedders with their own output path drive rendering directly.
    pub fn render_into(&self, out: &mut [f32]) -> usize {
        render_into(&self.queue, &self.playing_tx, out)
    }
}

impl Default for StreamingPlayer {
    fn default() -> Self {
        Self::new()
    }
}

fn render_into(queue: &Mutex<PlayQueue>, playing_tx: &watch::Sender<bool>, out: &mut [f32]) -> usize {
    let mut queue = queue.lock();
    let written = if queue.paused { 0 } else { queue.pop_into(out) };
    out[written..].fill(0.0);

    if !queue.paused {
        if written == 0 {
            playing_tx.send_replace(false);
        } else {
            playing_tx.send_replace(true);
        }
    }
    written
}
