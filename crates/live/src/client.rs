//! Session client
//!
//! The client owns the transport: a writer task drains an outgoing
//! queue (preserving submission order), a reader task decodes incoming
//! frames and drives connection state. Unclean closes feed a reconnect
//! loop that replays the full setup handshake with the cached system
//! instruction, backing off exponentially between attempts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use vanta_core::{AudioChunk, ImageFrame};

use crate::wire::{
    self, ActivityMarker, AutomaticActivityDetection, Blob, ClientMessage, Content,
    GenerationConfig, PrebuiltVoiceConfig, RealtimeInput, RealtimeInputConfig, ServerContent,
    ServerMessage, Setup, SpeechConfig, VoiceConfig,
};
use crate::{ConnectionState, LiveConfig, LiveError, SessionEvent};

const OUTGOING_CAPACITY: usize = 128;
const AUDIO_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// Backoff delays are capped regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// MIME type for captured microphone audio.
const AUDIO_INPUT_MIME: &str = "audio/pcm";

enum OutgoingFrame {
    Frame(ClientMessage),
    Close,
}

/// Client for the live protocol. Created once per process; connected on
/// start and disconnected on stop or fatal error.
pub struct LiveClient {
    config: LiveConfig,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<SessionEvent>,
    audio_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    outgoing_tx: Mutex<Option<mpsc::Sender<OutgoingFrame>>>,
    instruction: Mutex<Option<String>>,
    shutdown_tx: broadcast::Sender<()>,
    closing: AtomicBool,
    /// Bumped per physical connection so a stale reader cannot clobber
    /// the state of its successor.
    generation: AtomicU64,
}

impl LiveClient {
    /// Create a disconnected client.
    pub fn new(config: LiveConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state_tx,
            event_tx,
            audio_tx: Mutex::new(None),
            outgoing_tx: Mutex::new(None),
            instruction: Mutex::new(None),
            shutdown_tx,
            closing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Watch the connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to incoming model audio. Yields decoded PCM bytes in
    /// wire arrival order. A new subscription replaces any previous one.
    pub fn subscribe_audio(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(AUDIO_CAPACITY);
        *self.audio_tx.lock() = Some(tx);
        rx
    }

    /// Open the transport and run the setup handshake.
    ///
    /// Idempotent: calling while a session is active logs a warning and
    /// does nothing.
    pub async fn connect(self: &Arc<Self>, system_instruction: &str) -> Result<(), LiveError> {
        if self.state().is_active() {
            tracing::warn!("connect() while session active, ignoring");
            return Ok(());
        }

        *self.instruction.lock() = Some(system_instruction.to_string());
        self.closing.store(false, Ordering::SeqCst);
        self.open_connection(system_instruction.to_string(), false)
            .await
    }

    /// Send microphone audio and/or a camera frame. Empty input is a
    /// no-op; input while not connected is dropped with a warning.
    pub async fn send_media(
        &self,
        audio: Option<&AudioChunk>,
        image: Option<&ImageFrame>,
    ) -> Result<(), LiveError> {
        if audio.is_none() && image.is_none() {
            return Ok(());
        }
        if !self.state().can_send_messages() {
            tracing::warn!("send_media while {:?}, dropping", self.state());
            return Ok(());
        }

        let mut media_chunks = Vec::with_capacity(2);
        if let Some(chunk) = audio {
            media_chunks.push(Blob {
                mime_type: AUDIO_INPUT_MIME.to_string(),
                data: BASE64.encode(&chunk.data),
            });
        }
        if let Some(frame) = image {
            media_chunks.push(Blob {
                mime_type: frame.mime_type.clone(),
                data: BASE64.encode(&frame.data),
            });
        }

        self.enqueue(ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks,
            ..Default::default()
        }))
        .await
    }

    /// Mark the start of user speech.
    pub async fn send_activity_start(&self) -> Result<(), LiveError> {
        if !self.state().can_send_messages() {
            tracing::debug!("activity_start while {:?}, dropping", self.state());
            return Ok(());
        }
        self.enqueue(ClientMessage::RealtimeInput(RealtimeInput {
            activity_start: Some(ActivityMarker {}),
            ..Default::default()
        }))
        .await
    }

    /// Mark the end of user speech.
    pub async fn send_activity_end(&self) -> Result<(), LiveError> {
        if !self.state().can_send_messages() {
            tracing::debug!("activity_end while {:?}, dropping", self.state());
            return Ok(());
        }
        self.enqueue(ClientMessage::RealtimeInput(RealtimeInput {
            activity_end: Some(ActivityMarker {}),
            ..Default::default()
        }))
        .await
    }

    /// Publish a local interruption. No frame is sent; the remote infers
    /// interruption from the client starting a new user activity.
    pub fn signal_interruption(&self) {
        let _ = self.event_tx.send(SessionEvent::Interrupted);
    }

    /// Close the transport and cancel any pending reconnection.
    pub async fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        let outgoing = self.outgoing_tx.lock().take();
        if let Some(tx) = outgoing {
            let _ = tx.send(OutgoingFrame::Close).await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn open_connection<'a>(
        self: &'a Arc<Self>,
        instruction: String,
        reconnecting: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), LiveError>> + Send + 'a>>
    {
        Box::pin(self.open_connection_inner(instruction, reconnecting))
    }

    async fn open_connection_inner(
        self: &Arc<Self>,
        instruction: String,
        reconnecting: bool,
    ) -> Result<(), LiveError> {
        if !reconnecting {
            self.set_state(ConnectionState::Connecting);
        }

        let url = self.config.connect_url();
        let (ws, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                if !reconnecting {
                    self.set_state(ConnectionState::Error(format!("Connection failed: {}", e)));
                }
                return Err(LiveError::Transport(e.to_string()));
            }
        };
        tracing::info!("transport open: {}", self.config.endpoint);

        let (mut write, mut read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.outgoing_tx.lock() = Some(out_tx.clone());
        self.set_state(ConnectionState::Initializing);

        // The setup frame must be the first outgoing frame; nothing else
        // is accepted for sending until setupComplete flips the state.
        let setup = self.setup_message(&instruction);
        out_tx
            .send(OutgoingFrame::Frame(setup))
            .await
            .map_err(|_| LiveError::NotConnected)?;

        // Writer: single consumer of the outgoing queue, so frames hit
        // the transport in submission order.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    OutgoingFrame::Frame(msg) => match wire::encode_client(&msg) {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("failed to send frame: {}", e);
                                break;
                            }
                        }
                        Err(e) => tracing::error!("failed to encode frame: {}", e),
                    },
                    OutgoingFrame::Close => {
                        let _ = write
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "client closing".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        });

        // Reader: decodes frames until the connection ends, then decides
        // between a clean stop and the reconnect path.
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown_rx = client.shutdown_tx.subscribe();
            let mut local_stop = false;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        local_stop = true;
                        break;
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => client.handle_frame(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("transport closed by remote: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("transport error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }

            // A newer connection owns the shared state from here on.
            if client.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            client.outgoing_tx.lock().take();

            if local_stop || client.closing.load(Ordering::SeqCst) {
                client.set_state(ConnectionState::Disconnected);
            } else {
                client.run_reconnect().await;
            }
        });

        Ok(())
    }

    fn setup_message(&self, instruction: &str) -> ClientMessage {
        ClientMessage::Setup(Setup {
            model: self.config.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.config.voice.clone(),
                        },
                    },
                }),
            }),
            system_instruction: Some(Content::from_text(instruction)),
            realtime_input_config: Some(RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection { disabled: true },
            }),
        })
    }

    async fn handle_frame(&self, text: &str) {
        let msg = match wire::decode_server(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("dropping invalid frame: {}", e);
                return;
            }
        };

        match msg {
            ServerMessage::SetupComplete(_) => {
                if self.state() == ConnectionState::Initializing {
                    self.set_state(ConnectionState::Connected);
                    let _ = self.event_tx.send(SessionEvent::Ready);
                } else {
                    tracing::warn!("setupComplete in state {:?}, ignoring", self.state());
                }
            }
            ServerMessage::ServerContent(content) => self.handle_server_content(content).await,
            other => tracing::debug!("ignoring server message: {:?}", other),
        }
    }

    async fn handle_server_content(&self, content: ServerContent) {
        if content.interrupted {
            tracing::info!("model turn interrupted by server");
            let _ = self.event_tx.send(SessionEvent::Interrupted);
            // No audio from an interrupted frame may reach the player.
            return;
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    if blob.mime_type.starts_with("audio/") {
                        match BASE64.decode(blob.data.as_bytes()) {
                            Ok(bytes) => {
                                if self.state() == ConnectionState::Connected {
                                    self.set_state(ConnectionState::Streaming);
                                }
                                let tx = self.audio_tx.lock().clone();
                                match tx {
                                    Some(tx) => {
                                        if tx.send(bytes).await.is_err() {
                                            tracing::debug!("model audio consumer gone, dropping chunk");
                                        }
                                    }
                                    None => tracing::debug!("no model audio subscriber, dropping chunk"),
                                }
                            }
                            Err(e) => tracing::warn!("invalid audio payload: {}", e),
                        }
                    } else {
                        tracing::debug!("ignoring inline data of type {}", blob.mime_type);
                    }
                } else if let Some(text) = part.text {
                    tracing::debug!("model text part: {}", text);
                }
            }
        }

        if content.turn_complete {
            if self.state() == ConnectionState::Streaming {
                self.set_state(ConnectionState::Connected);
            }
            let _ = self.event_tx.send(SessionEvent::TurnComplete);
        }
    }

    async fn run_reconnect(self: &Arc<Self>) {
        let instruction = match self.instruction.lock().clone() {
            Some(instruction) => instruction,
            None => {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        };

        let max = self.config.reconnect_max_attempts;
        let base = Duration::from_millis(self.config.reconnect_base_delay_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        for attempt in 1..=max {
            self.set_state(ConnectionState::Reconnecting { attempt, max });
            tracing::info!("reconnection attempt {}/{}", attempt, max);

            match self.open_connection(instruction.clone(), true).await {
                Ok(()) => return,
                Err(e) => tracing::warn!("reconnection attempt {} failed: {}", attempt, e),
            }

            let delay = backoff_delay(base, attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
        }

        self.set_state(ConnectionState::Error(
            "Max reconnection attempts reached".to_string(),
        ));
        let _ = self.event_tx.send(SessionEvent::ConnectionLost);
    }

    async fn enqueue(&self, msg: ClientMessage) -> Result<(), LiveError> {
        let tx = self.outgoing_tx.lock().clone();
        match tx {
            Some(tx) => {
                if tx.send(OutgoingFrame::Frame(msg)).await.is_err() {
                    tracing::warn!("transport writer gone, dropping frame");
                }
                Ok(())
            }
            None => {
                tracing::warn!("no active transport, dropping frame");
                Ok(())
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!("connection state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }
}

/// Delay between reconnection attempt `n` and `n + 1`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF)
}
