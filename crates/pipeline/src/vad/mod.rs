//! Voice Activity Detection
//!
//! Converts the 16 kHz capture stream into coarse `SpeechStart` /
//! `SpeechEnd` events. A recurrent speech-probability model scores
//! fixed 512-sample windows; a dual-threshold hysteresis with minimum
//! speech and trailing-silence durations keeps the state stable.

#[cfg(feature = "onnx")]
mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroModel;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use vanta_core::pcm_to_f32;

use crate::PipelineError;

/// Samples per inference window (~32 ms at 16 kHz).
pub const WINDOW_SAMPLES: usize = 512;

const EVENT_CAPACITY: usize = 32;

/// Hysteresis configuration.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Probability at or above this starts speech
    pub speech_threshold: f32,
    /// Probability below this counts toward trailing silence
    pub silence_threshold: f32,
    /// Minimum speech duration before a turn may end
    pub min_speech: Duration,
    /// Minimum trailing silence before a turn ends
    pub min_silence: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.5,
            silence_threshold: 0.35,
            min_speech: Duration::from_millis(250),
            min_silence: Duration::from_millis(100),
        }
    }
}

impl From<&vanta_config::VadSettings> for VadConfig {
    fn from(settings: &vanta_config::VadSettings) -> Self {
        Self {
            speech_threshold: settings.speech_threshold,
            silence_threshold: settings.silence_threshold,
            min_speech: Duration::from_millis(settings.min_speech_ms),
            min_silence: Duration::from_millis(settings.min_silence_ms),
        }
    }
}

/// Coarse speech boundary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    SpeechEnd,
}

/// Per-window speech-probability model.
///
/// Implementations own whatever recurrent state they carry between
/// windows; `reset` returns it to the initial state.
pub trait SpeechModel: Send {
    /// Score one 512-sample window, returning a probability in [0, 1].
    fn infer(&mut self, window: &[f32]) -> Result<f32, PipelineError>;

    /// Zero the recurrent state.
    fn reset(&mut self);
}

/// Energy-based fallback model for builds without the ONNX runtime.
///
/// Maps RMS energy onto [0, 1]; far cruder than the recurrent model but
/// keeps the pipeline usable.
#[derive(Debug, Default)]
pub struct EnergyModel;

impl SpeechModel for EnergyModel {
    fn infer(&mut self, window: &[f32]) -> Result<f32, PipelineError> {
        if window.is_empty() {
            return Ok(0.0);
        }
        let sum_squares: f32 = window.iter().map(|s| s * s).sum();
        let rms = (sum_squares / window.len() as f32).sqrt();
        Ok((rms / 0.05).min(1.0))
    }

    fn reset(&mut self) {}
}

/// Dual-threshold hysteresis over the probability stream.
///
/// The clock is passed in explicitly; production code uses
/// `Instant::now()` at the API point.
#[derive(Debug)]
pub struct SpeechDetector {
    config: VadConfig,
    speech_active: bool,
    speech_started_at: Option<Instant>,
    silence_started_at: Option<Instant>,
}

impl SpeechDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speech_active: false,
            speech_started_at: None,
            silence_started_at: None,
        }
    }

    /// Apply one probability sample at `now`.
    pub fn update(&mut self, probability: f32, now: Instant) -> Option<VadEvent> {
        if !self.speech_active {
            if probability >= self.config.speech_threshold {
                self.speech_active = true;
                self.speech_started_at = Some(now);
                self.silence_started_at = None;
                return Some(VadEvent::SpeechStart);
            }
            return None;
        }

        if probability < self.config.silence_threshold {
            let silence_started = *self.silence_started_at.get_or_insert(now);
            let speech_started = self.speech_started_at.unwrap_or(now);
            if now.duration_since(silence_started) >= self.config.min_silence
                && now.duration_since(speech_started) >= self.config.min_speech
            {
                self.speech_active = false;
                self.silence_started_at = None;
                return Some(VadEvent::SpeechEnd);
            }
        } else {
            // Still speaking
            self.silence_started_at = None;
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    /// Clear all timers and force inactive.
    pub fn reset(&mut self) {
        self.speech_active = false;
        self.speech_started_at = None;
        self.silence_started_at = None;
    }
}

struct VadInner {
    model: Option<Box<dyn SpeechModel>>,
    detector: SpeechDetector,
}

impl VadInner {
    fn process(&mut self, samples: &[f32], now: Instant) -> (Vec<VadEvent>, Option<f32>) {
        let mut events = Vec::new();
        let mut last_probability = None;

        for window in samples.chunks_exact(WINDOW_SAMPLES) {
            let probability = match self.model.as_mut() {
                Some(model) => match model.infer(window) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!("vad inference failed, treating as silence: {}", e);
                        0.0
                    }
                },
                None => {
                    tracing::warn!("vad model released, treating as silence");
                    0.0
                }
            };
            last_probability = Some(probability);
            if let Some(event) = self.detector.update(probability, now) {
                events.push(event);
            }
        }

        (events, last_probability)
    }
}

/// VAD engine: model plus hysteresis behind one lock, so `reset` is
/// atomic with respect to chunk processing.
pub struct VadEngine {
    inner: Arc<Mutex<VadInner>>,
    event_tx: mpsc::Sender<VadEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<VadEvent>>>,
}

impl VadEngine {
    /// Load the speech model from the configured path.
    #[cfg(feature = "onnx")]
    pub fn load(model_path: &str, config: VadConfig) -> Result<Self, PipelineError> {
        let model = SileroModel::load(model_path)?;
        Ok(Self::with_model(Box::new(model), config))
    }

    /// Without the onnx feature the engine falls back to energy-based
    /// detection.
    #[cfg(not(feature = "onnx"))]
    pub fn load(_model_path: &str, config: VadConfig) -> Result<Self, PipelineError> {
        tracing::warn!("built without the onnx feature, using energy-based detection");
        Ok(Self::with_model(Box::new(EnergyModel), config))
    }

    /// Build an engine around an explicit model implementation.
    pub fn with_model(model: Box<dyn SpeechModel>, config: VadConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(VadInner {
                model: Some(model),
                detector: SpeechDetector::new(config),
            })),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the speech event channel. Can be taken once per engine.
    pub fn take_events(&self) -> Option<mpsc::Receiver<VadEvent>> {
        self.event_rx.lock().take()
    }

    /// Feed one chunk of s16le 16 kHz PCM.
    ///
    /// The chunk is split into non-overlapping 512-sample windows;
    /// remainder samples are discarded. Inference runs on the blocking
    /// pool. Returns the last window's probability, or `None` when the
    /// chunk was shorter than one window.
    pub async fn process_audio_chunk(&self, pcm: &[u8]) -> Result<Option<f32>, PipelineError> {
        let samples = pcm_to_f32(pcm);
        if samples.len() < WINDOW_SAMPLES {
            return Ok(None);
        }

        let inner = self.inner.clone();
        let (events, probability) = tokio::task::spawn_blocking(move || {
            let mut inner = inner.lock();
            inner.process(&samples, Instant::now())
        })
        .await
        .map_err(|e| PipelineError::Inference(format!("inference task failed: {}", e)))?;

        for event in events {
            if self.event_tx.send(event).await.is_err() {
                tracing::debug!("vad event consumer gone, dropping {:?}", event);
            }
        }

        Ok(probability)
    }

    /// Whether speech is currently active.
    pub fn is_active(&self) -> bool {
        self.inner.lock().detector.is_active()
    }

    /// Zero the recurrent state, clear all timers, force inactive.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if let Some(model) = inner.model.as_mut() {
            model.reset();
        }
        inner.detector.reset();
    }

    /// Drop the inference session. Further chunks are treated as silence.
    pub fn release(&self) {
        self.inner.lock().model.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        probabilities: VecDeque<f32>,
        resets: Arc<AtomicUsize>,
    }

    impl ScriptedModel {
        fn new(probabilities: &[f32]) -> Self {
            Self {
                probabilities: probabilities.iter().copied().collect(),
                resets: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SpeechModel for ScriptedModel {
        fn infer(&mut self, _window: &[f32]) -> Result<f32, PipelineError> {
            Ok(self.probabilities.pop_front().unwrap_or(0.0))
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingModel;

    impl SpeechModel for FailingModel {
        fn infer(&mut self, _window: &[f32]) -> Result<f32, PipelineError> {
            Err(PipelineError::Inference("broken".to_string()))
        }

        fn reset(&mut self) {}
    }

    fn pcm(samples: usize) -> Vec<u8> {
        vec![0u8; samples * 2]
    }

    fn ms(offset: u64) -> Duration {
        Duration::from_millis(offset)
    }

    #[test]
    fn test_detector_start_immediately_on_speech() {
        let mut detector = SpeechDetector::new(VadConfig::default());
        let t0 = Instant::now();

        assert_eq!(detector.update(0.1, t0), None);
        assert_eq!(detector.update(0.1, t0 + ms(32)), None);
        assert_eq!(detector.update(0.7, t0 + ms(64)), Some(VadEvent::SpeechStart));
        assert!(detector.is_active());
    }

    #[test]
    fn test_detector_end_needs_min_speech_and_min_silence() {
        let mut detector = SpeechDetector::new(VadConfig::default());
        let t0 = Instant::now();

        assert_eq!(detector.update(0.7, t0), Some(VadEvent::SpeechStart));

        // Silence onset, but both minimums unmet.
        assert_eq!(detector.update(0.2, t0 + ms(32)), None);
        // Silence long enough (104 ms) but speech too short (136 ms < 250 ms).
        assert_eq!(detector.update(0.2, t0 + ms(136)), None);
        // Both satisfied: silence 224 ms, speech 256 ms.
        assert_eq!(detector.update(0.2, t0 + ms(256)), Some(VadEvent::SpeechEnd));
        assert!(!detector.is_active());
    }

    #[test]
    fn test_detector_midband_keeps_speaking() {
        let mut detector = SpeechDetector::new(VadConfig::default());
        let t0 = Instant::now();

        assert_eq!(detector.update(0.7, t0), Some(VadEvent::SpeechStart));
        assert_eq!(detector.update(0.2, t0 + ms(300)), None); // silence onset
        // Back above the silence threshold: onset cleared.
        assert_eq!(detector.update(0.4, t0 + ms(350)), None);
        // New silence must run the full minimum again.
        assert_eq!(detector.update(0.2, t0 + ms(400)), None);
        assert_eq!(detector.update(0.2, t0 + ms(460)), None);
        assert_eq!(detector.update(0.2, t0 + ms(510)), Some(VadEvent::SpeechEnd));
    }

    #[test]
    fn test_detector_one_end_per_start() {
        let mut detector = SpeechDetector::new(VadConfig::default());
        let t0 = Instant::now();

        assert_eq!(detector.update(0.9, t0), Some(VadEvent::SpeechStart));
        assert_eq!(detector.update(0.1, t0 + ms(300)), None);
        assert_eq!(detector.update(0.1, t0 + ms(450)), Some(VadEvent::SpeechEnd));
        // Continued silence emits nothing further.
        assert_eq!(detector.update(0.1, t0 + ms(600)), None);
        assert_eq!(detector.update(0.1, t0 + ms(900)), None);
        // Next start requires crossing the speech threshold again.
        assert_eq!(detector.update(0.6, t0 + ms(1000)), Some(VadEvent::SpeechStart));
    }

    #[test]
    fn test_detector_reset_forces_inactive() {
        let mut detector = SpeechDetector::new(VadConfig::default());
        let t0 = Instant::now();

        detector.update(0.9, t0);
        assert!(detector.is_active());
        detector.reset();
        assert!(!detector.is_active());
    }

    #[tokio::test]
    async fn test_engine_emits_speech_start() {
        let engine = VadEngine::with_model(
            Box::new(ScriptedModel::new(&[0.1, 0.1, 0.7])),
            VadConfig::default(),
        );
        let mut events = engine.take_events().unwrap();

        let probability = engine
            .process_audio_chunk(&pcm(3 * WINDOW_SAMPLES))
            .await
            .unwrap();
        assert_eq!(probability, Some(0.7));
        assert_eq!(events.recv().await, Some(VadEvent::SpeechStart));
        assert!(engine.is_active());
    }

    #[tokio::test]
    async fn test_engine_short_chunk_discarded() {
        let engine =
            VadEngine::with_model(Box::new(ScriptedModel::new(&[0.9])), VadConfig::default());

        let probability = engine.process_audio_chunk(&pcm(300)).await.unwrap();
        assert_eq!(probability, None);
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn test_engine_inference_failure_is_silence() {
        let engine = VadEngine::with_model(Box::new(FailingModel), VadConfig::default());

        let probability = engine
            .process_audio_chunk(&pcm(WINDOW_SAMPLES))
            .await
            .unwrap();
        assert_eq!(probability, Some(0.0));
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn test_engine_release_treats_audio_as_silence() {
        let engine = VadEngine::with_model(
            Box::new(ScriptedModel::new(&[0.9, 0.9])),
            VadConfig::default(),
        );
        engine.release();

        let probability = engine
            .process_audio_chunk(&pcm(WINDOW_SAMPLES))
            .await
            .unwrap();
        assert_eq!(probability, Some(0.0));
    }

    #[tokio::test]
    async fn test_engine_reset_reaches_model() {
        let model = ScriptedModel::new(&[]);
        let resets = model.resets.clone();
        let engine = VadEngine::with_model(Box::new(model), VadConfig::default());

        engine.reset();
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_energy_model_scores() {
        let mut model = EnergyModel;
        let silence = vec![0.0f32; WINDOW_SAMPLES];
        assert_eq!(model.infer(&silence).unwrap(), 0.0);

        let loud = vec![0.5f32; WINDOW_SAMPLES];
        assert_eq!(model.infer(&loud).unwrap(), 1.0);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = vanta_config::VadSettings::default();
        let config = VadConfig::from(&settings);
        assert_eq!(config.speech_threshold, 0.5);
        assert_eq!(config.silence_threshold, 0.35);
        assert_eq!(config.min_speech, Duration::from_millis(250));
        assert_eq!(config.min_silence, Duration::from_millis(100));
    }
}
