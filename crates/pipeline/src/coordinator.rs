//! Coordinator
//!
//! Wires capture sources, VAD, playback, and the live session into one
//! state machine. Five long-lived tasks move media and signals; the
//! published top-level state is derived purely from the connection
//! state, the playing flag, and the speaking flag.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use vanta_config::Settings;
use vanta_live::{ConnectionState, LiveClient, LiveConfig};

use crate::player::StreamingPlayer;
use crate::prompts::AssistantMode;
use crate::sources::{CameraSource, MicrophoneSource};
use crate::vad::{VadConfig, VadEngine, VadEvent};
use crate::PipelineError;

/// Published top-level assistant state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantState {
    /// Not running
    Idle,
    /// Session being established or re-established
    Connecting,
    /// Ready; no active turn
    Listening,
    /// Model audio rendering
    Speaking,
    /// User speech detected
    UserSpeaking,
    /// Fatal failure
    Error(String),
}

/// Derive the top-level state. First match wins:
/// error, connecting, user speaking, model speaking, ready, idle.
pub fn derive_state(
    connection: &ConnectionState,
    is_playing: bool,
    is_speaking: bool,
) -> AssistantState {
    match connection {
        ConnectionState::Error(message) => AssistantState::Error(message.clone()),
        ConnectionState::Connecting
        | ConnectionState::Initializing
        | ConnectionState::Reconnecting { .. } => AssistantState::Connecting,
        _ if is_speaking => AssistantState::UserSpeaking,
        _ if is_playing => AssistantState::Speaking,
        ConnectionState::Connected | ConnectionState::Streaming => AssistantState::Listening,
        ConnectionState::Disconnected => AssistantState::Idle,
    }
}

type VadLoader = Box<dyn Fn(&Settings) -> Result<VadEngine, PipelineError> + Send + Sync>;

struct Running {
    mode: AssistantMode,
    vad: Arc<VadEngine>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// The assistant core. Created once; `start` brings the pipeline up,
/// `stop` tears it down, `switch_mode` swaps the system instruction
/// without touching capture.
pub struct Coordinator {
    settings: Settings,
    session: Arc<LiveClient>,
    camera: Arc<dyn CameraSource>,
    microphone: Arc<dyn MicrophoneSource>,
    player: Arc<StreamingPlayer>,
    vad_loader: VadLoader,
    state_tx: watch::Sender<AssistantState>,
    probability_tx: watch::Sender<f32>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Coordinator {
    /// Coordinator over the default session client, player, and VAD
    /// model from `settings`.
    pub fn new(
        settings: Settings,
        camera: Arc<dyn CameraSource>,
        microphone: Arc<dyn MicrophoneSource>,
    ) -> Self {
        let session = Arc::new(LiveClient::new(LiveConfig {
            endpoint: settings.session.endpoint.clone(),
            credential: settings.session.credential.clone(),
            model: settings.session.model.clone(),
            voice: settings.session.voice.clone(),
            reconnect_max_attempts: settings.reconnect.max_attempts,
            reconnect_base_delay_ms: settings.reconnect.base_delay_ms,
        }));
        let player = Arc::new(StreamingPlayer::new());
        let vad_loader: VadLoader = Box::new(|settings: &Settings| {
            VadEngine::load(&settings.vad.model, VadConfig::from(&settings.vad))
        });
        Self::with_parts(settings, session, camera, microphone, player, vad_loader)
    }

    /// Coordinator over explicit parts. The seam used by embedders with
    /// custom backends and by tests.
    pub fn with_parts(
        settings: Settings,
        session: Arc<LiveClient>,
        camera: Arc<dyn CameraSource>,
        microphone: Arc<dyn MicrophoneSource>,
        player: Arc<StreamingPlayer>,
        vad_loader: VadLoader,
    ) -> Self {
        let (state_tx, _) = watch::channel(AssistantState::Idle);
        let (probability_tx, _) = watch::channel(0.0);
        Self {
            settings,
            session,
            camera,
            microphone,
            player,
            vad_loader,
            state_tx,
            probability_tx,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Watch the top-level state.
    pub fn state(&self) -> watch::Receiver<AssistantState> {
        self.state_tx.subscribe()
    }

    /// Watch the latest speech probability.
    pub fn speech_probability(&self) -> watch::Receiver<f32> {
        self.probability_tx.subscribe()
    }

    /// Watch the downstream connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.connection_state()
    }

    /// The session client.
    pub fn session(&self) -> &Arc<LiveClient> {
        &self.session
    }

    /// The streaming player.
    pub fn player(&self) -> &Arc<StreamingPlayer> {
        &self.player
    }

    /// Bring the pipeline up: VAD, player, capture sources, session, and
    /// the five forwarding tasks. Rejected while already running.
    pub async fn start(&self, mode: AssistantMode) -> Result<(), PipelineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        tracing::info!("starting assistant in {:?} mode", mode);

        let vad = Arc::new(self.fatal((self.vad_loader)(&self.settings))?);
        let vad_events = vad
            .take_events()
            .ok_or(PipelineError::ChannelClosed)?;

        self.fatal(self.player.initialize())?;

        let camera_rx = self.fatal(self.camera.start().await)?;
        let microphone_rx = self.fatal(self.microphone.start().await)?;

        let audio_rx = self.session.subscribe_audio();
        if let Err(e) = self.session.connect(mode.instruction()).await {
            // Connection state already carries the failure.
            return Err(PipelineError::Session(e.to_string()));
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (speaking_tx, speaking_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(5);

        tasks.push(self.spawn_camera_forwarder(camera_rx, shutdown_tx.subscribe()));
        tasks.push(self.spawn_audio_forwarder(microphone_rx, vad.clone(), shutdown_tx.subscribe()));
        tasks.push(self.spawn_response_handler(audio_rx, shutdown_tx.subscribe()));
        tasks.push(self.spawn_vad_handler(vad_events, speaking_tx, shutdown_tx.subscribe()));
        tasks.push(self.spawn_state_mapper(speaking_rx, shutdown_tx.subscribe()));

        *running = Some(Running {
            mode,
            vad,
            shutdown_tx,
            tasks,
        });
        Ok(())
    }

    /// Tear everything down and return to `Idle`.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(active) = running.take() else {
            tracing::warn!("stop() while not running");
            return;
        };

        tracing::info!("stopping assistant");

        let _ = active.shutdown_tx.send(());
        self.session.disconnect().await;
        for task in active.tasks {
            let _ = task.await;
        }

        self.camera.stop().await;
        self.microphone.stop().await;
        self.player.release();
        active.vad.release();

        self.probability_tx.send_replace(0.0);
        self.state_tx.send_replace(AssistantState::Idle);
    }

    /// Reconnect under a different mode's instruction. Capture sources
    /// and tasks stay up; the VAD starts from zeroed state.
    pub async fn switch_mode(&self, mode: AssistantMode) -> Result<(), PipelineError> {
        let mut running = self.running.lock().await;
        let Some(active) = running.as_mut() else {
            tracing::warn!("switch_mode() while not running");
            return Ok(());
        };
        if active.mode == mode {
            return Ok(());
        }

        tracing::info!("switching mode {:?} -> {:?}", active.mode, mode);

        self.session.disconnect().await;
        active.vad.reset();
        self.session
            .connect(mode.instruction())
            .await
            .map_err(|e| PipelineError::Session(e.to_string()))?;
        active.mode = mode;
        Ok(())
    }

    /// Publish a fatal startup failure before bubbling it.
    fn fatal<T>(&self, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
        if let Err(e) = &result {
            self.state_tx
                .send_replace(AssistantState::Error(e.to_string()));
        }
        result
    }

    fn spawn_camera_forwarder(
        &self,
        mut frames: tokio::sync::mpsc::Receiver<vanta_core::ImageFrame>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let session = self.session.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => {
                            let _ = session.send_media(None, Some(&frame)).await;
                        }
                        None => break,
                    }
                }
            }
        })
    }

    fn spawn_audio_forwarder(
        &self,
        mut chunks: tokio::sync::mpsc::Receiver<vanta_core::AudioChunk>,
        vad: Arc<VadEngine>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let session = self.session.clone();
        let probability_tx = self.probability_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    chunk = chunks.recv() => match chunk {
                        Some(chunk) => {
                            // The VAD must see the chunk no later than
                            // the network.
                            match vad.process_audio_chunk(&chunk.data).await {
                                Ok(Some(probability)) => {
                                    probability_tx.send_replace(probability);
                                }
                                Ok(None) => {}
                                Err(e) => tracing::warn!("vad processing failed: {}", e),
                            }
                            let _ = session.send_media(Some(&chunk), None).await;
                        }
                        None => break,
                    }
                }
            }
        })
    }

    fn spawn_response_handler(
        &self,
        mut audio: tokio::sync::mpsc::Receiver<Vec<u8>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let player = self.player.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    pcm = audio.recv() => match pcm {
                        Some(pcm) => {
                            // A fresh model turn resumes a player left
                            // paused by barge-in.
                            player.resume();
                            if let Err(e) = player.enqueue(&pcm) {
                                tracing::warn!("failed to enqueue model audio: {}", e);
                            }
                        }
                        None => break,
                    }
                }
            }
        })
    }

    fn spawn_vad_handler(
        &self,
        mut events: tokio::sync::mpsc::Receiver<VadEvent>,
        speaking_tx: watch::Sender<bool>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let session = self.session.clone();
        let player = self.player.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => match event {
                        Some(VadEvent::SpeechStart) => {
                            speaking_tx.send_replace(true);
                            if player.playing_now() {
                                player.pause();
                                player.flush();
                            }
                            let _ = session.send_activity_start().await;
                            session.signal_interruption();
                        }
                        Some(VadEvent::SpeechEnd) => {
                            speaking_tx.send_replace(false);
                            let _ = session.send_activity_end().await;
                        }
                        None => break,
                    }
                }
            }
        })
    }

    fn spawn_state_mapper(
        &self,
        mut speaking_rx: watch::Receiver<bool>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let mut connection_rx = self.session.connection_state();
        let mut playing_rx = self.player.is_playing();
        let state_tx = self.state_tx.clone();
        tokio::spawn(async move {
            loop {
                let next = derive_state(
                    &connection_rx.borrow().clone(),
                    *playing_rx.borrow(),
                    *speaking_rx.borrow(),
                );
                state_tx.send_if_modified(|state| {
                    if *state == next {
                        return false;
                    }
                    tracing::debug!("assistant state {:?} -> {:?}", state, next);
                    *state = next;
                    true
                });

                tokio::select! {
                    _ = shutdown.recv() => break,
                    changed = connection_rx.changed() => if changed.is_err() { break },
                    changed = playing_rx.changed() => if changed.is_err() { break },
                    changed = speaking_rx.changed() => if changed.is_err() { break },
                }
            }
        })
    }
}
