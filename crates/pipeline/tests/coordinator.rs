//! Coordinator integration tests
//!
//! A local WebSocket endpoint stands in for the remote model; capture is
//! driven through channel-backed sources and a scripted speech model.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use vanta_config::Settings;
use vanta_core::{AudioChunk, ImageFrame};
use vanta_live::{LiveClient, LiveConfig, SessionEvent};
use vanta_pipeline::{
    AssistantMode, AssistantState, ChannelCamera, ChannelMicrophone, Coordinator, NullBackend,
    PipelineError, SpeechModel, StreamingPlayer, VadConfig, VadEngine,
};

enum Inject {
    Text(String),
}

struct MockEndpoint {
    addr: SocketAddr,
    incoming: mpsc::UnboundedReceiver<String>,
    inject: mpsc::UnboundedSender<Inject>,
    connections: Arc<AtomicUsize>,
}

async fn mock_endpoint(max_accepts: usize) -> MockEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (inj_tx, mut inj_rx) = mpsc::unbounded_channel::<Inject>();
    let connections = Arc::new(AtomicUsize::new(0));
    let connections_task = connections.clone();

    tokio::spawn(async move {
        for _ in 0..max_accepts {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            connections_task.fetch_add(1, Ordering::SeqCst);
            let mut ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => continue,
            };

            loop {
                tokio::select! {
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = in_tx.send(text);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    },
                    cmd = inj_rx.recv() => match cmd {
                        Some(Inject::Text(text)) => {
                            let _ = ws.send(Message::Text(text)).await;
                        }
                        None => return,
                    }
                }
            }
        }
    });

    MockEndpoint {
        addr,
        incoming: in_rx,
        inject: inj_tx,
        connections,
    }
}

/// Probability script shared with the model inside the coordinator.
#[derive(Clone, Default)]
struct Script {
    probabilities: Arc<Mutex<VecDeque<f32>>>,
    resets: Arc<AtomicUsize>,
}

impl Script {
    fn push(&self, probabilities: &[f32]) {
        self.probabilities.lock().extend(probabilities.iter().copied());
    }

    fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

struct ScriptedModel(Script);

impl SpeechModel for ScriptedModel {
    fn infer(&mut self, _window: &[f32]) -> Result<f32, PipelineError> {
        Ok(self.0.probabilities.lock().pop_front().unwrap_or(0.0))
    }

    fn reset(&mut self) {
        self.0.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_settings(addr: SocketAddr) -> Settings {
    let mut settings = Settings::default();
    settings.session.endpoint = format!("ws://{}", addr);
    settings.reconnect.max_attempts = 3;
    settings.reconnect.base_delay_ms = 50;
    // Short hysteresis windows keep the tests fast.
    settings.vad.min_speech_ms = 60;
    settings.vad.min_silence_ms = 40;
    settings
}

struct Harness {
    coordinator: Coordinator,
    script: Script,
    camera_tx: mpsc::Sender<ImageFrame>,
    microphone_tx: mpsc::Sender<AudioChunk>,
}

fn harness(addr: SocketAddr) -> Harness {
    let settings = test_settings(addr);
    let session = Arc::new(LiveClient::new(LiveConfig {
        endpoint: settings.session.endpoint.clone(),
        credential: settings.session.credential.clone(),
        model: settings.session.model.clone(),
        voice: settings.session.voice.clone(),
        reconnect_max_attempts: settings.reconnect.max_attempts,
        reconnect_base_delay_ms: settings.reconnect.base_delay_ms,
    }));
    let (camera_tx, camera) = ChannelCamera::new(8);
    let (microphone_tx, microphone) = ChannelMicrophone::new(32);
    let player = Arc::new(StreamingPlayer::with_backend(Box::<NullBackend>::default()));

    let script = Script::default();
    let loader_script = script.clone();
    let coordinator = Coordinator::with_parts(
        settings,
        session,
        Arc::new(camera),
        Arc::new(microphone),
        player,
        Box::new(move |settings: &Settings| {
            Ok(VadEngine::with_model(
                Box::new(ScriptedModel(loader_script.clone())),
                VadConfig::from(&settings.vad),
            ))
        }),
    );

    Harness {
        coordinator,
        script,
        camera_tx,
        microphone_tx,
    }
}

/// A capture chunk spanning `windows` full inference windows.
fn mic_chunk(windows: usize) -> AudioChunk {
    AudioChunk::input(vec![0u8; windows * 512 * 2])
}

async fn wait_for_state(
    rx: &mut watch::Receiver<AssistantState>,
    pred: impl Fn(&AssistantState) -> bool,
) -> AssistantState {
    timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("timed out waiting for state")
}

async fn wait_for_frame_containing(
    rx: &mut mpsc::UnboundedReceiver<String>,
    needle: &str,
) -> String {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = rx.recv().await.expect("endpoint closed");
            if frame.contains(needle) {
                return frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for frame containing {:?}", needle))
}

async fn start_listening(
    harness: &Harness,
    server: &mut MockEndpoint,
    mode: AssistantMode,
) -> String {
    let mut state_rx = harness.coordinator.state();
    harness.coordinator.start(mode).await.expect("start failed");
    let setup = wait_for_frame_containing(&mut server.incoming, "\"setup\"").await;
    server
        .inject
        .send(Inject::Text(r#"{"setupComplete":{}}"#.to_string()))
        .unwrap();
    wait_for_state(&mut state_rx, |s| *s == AssistantState::Listening).await;
    setup
}

#[tokio::test]
async fn start_reaches_listening() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);

    assert_eq!(*harness.coordinator.state().borrow(), AssistantState::Idle);

    let setup = start_listening(&harness, &mut server, AssistantMode::Scene).await;
    assert!(setup.contains("\"response_modalities\":[\"AUDIO\"]"));
    assert!(setup.contains("\"automatic_activity_detection\":{\"disabled\":true}"));
    assert!(setup.contains("sighted guide"));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);

    start_listening(&harness, &mut server, AssistantMode::Scene).await;
    assert!(matches!(
        harness.coordinator.start(AssistantMode::Scene).await,
        Err(PipelineError::AlreadyRunning)
    ));
}

#[tokio::test]
async fn stop_returns_to_idle() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);
    let mut state_rx = harness.coordinator.state();

    start_listening(&harness, &mut server, AssistantMode::Scene).await;
    harness.coordinator.stop().await;

    wait_for_state(&mut state_rx, |s| *s == AssistantState::Idle).await;
    assert_eq!(
        *harness.coordinator.connection_state().borrow(),
        vanta_live::ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn camera_frames_reach_the_wire() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);

    start_listening(&harness, &mut server, AssistantMode::Scene).await;

    harness
        .camera_tx
        .send(ImageFrame::jpeg(vec![0xFF, 0xD8, 0xFF, 0xE0]))
        .await
        .unwrap();

    let frame = wait_for_frame_containing(&mut server.incoming, "image/jpeg").await;
    assert!(frame.contains("\"realtimeInput\""));
    assert!(frame.contains("\"mime_type\":\"image/jpeg\""));
}

#[tokio::test]
async fn microphone_chunks_reach_the_wire() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);

    start_listening(&harness, &mut server, AssistantMode::Scene).await;

    harness.microphone_tx.send(mic_chunk(1)).await.unwrap();

    let frame = wait_for_frame_containing(&mut server.incoming, "audio/pcm").await;
    assert!(frame.contains("\"media_chunks\""));
}

#[tokio::test]
async fn model_audio_reaches_the_player() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);
    let mut state_rx = harness.coordinator.state();

    start_listening(&harness, &mut server, AssistantMode::Scene).await;

    server
        .inject
        .send(Inject::Text(
            r#"{"serverContent":{"model_turn":{"parts":[{"inline_data":{"mime_type":"audio/pcm","data":"AAECAwQFBgc="}}]}}}"#
                .to_string(),
        ))
        .unwrap();

    wait_for_state(&mut state_rx, |s| *s == AssistantState::Speaking).await;
    assert!(harness.coordinator.player().playing_now());
}

#[tokio::test]
async fn barge_in_pauses_flushes_and_signals() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);
    let mut state_rx = harness.coordinator.state();
    let mut events = harness.coordinator.session().events();

    start_listening(&harness, &mut server, AssistantMode::Scene).await;

    // Model audio is rendering: 200 ms of output-side PCM.
    harness.coordinator.player().enqueue(&[0u8; 9600]).unwrap();
    wait_for_state(&mut state_rx, |s| *s == AssistantState::Speaking).await;

    // Capture windows scoring [0.1, 0.1, 0.7] start the user's turn.
    harness.script.push(&[0.1, 0.1, 0.7]);
    harness.microphone_tx.send(mic_chunk(3)).await.unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            if events.recv().await.unwrap() == SessionEvent::Interrupted {
                return;
            }
        }
    })
    .await
    .expect("no interruption event");

    let frame = wait_for_frame_containing(&mut server.incoming, "activity_start").await;
    assert!(frame.contains("\"activity_start\":{}"));
    wait_for_state(&mut state_rx, |s| *s == AssistantState::UserSpeaking).await;
    assert!(!harness.coordinator.player().playing_now());

    // Enough trailing silence with enough total speech ends the turn.
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.script.push(&[0.2]);
    harness.microphone_tx.send(mic_chunk(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    harness.script.push(&[0.2]);
    harness.microphone_tx.send(mic_chunk(1)).await.unwrap();

    let frame = wait_for_frame_containing(&mut server.incoming, "activity_end").await;
    assert!(frame.contains("\"activity_end\":{}"));
    wait_for_state(&mut state_rx, |s| *s == AssistantState::Listening).await;
}

#[tokio::test]
async fn mode_switch_reconnects_with_new_instruction() {
    let mut server = mock_endpoint(2).await;
    let harness = harness(server.addr);
    let mut state_rx = harness.coordinator.state();

    let setup = start_listening(&harness, &mut server, AssistantMode::Social).await;
    assert!(setup.contains("social companion"));

    harness
        .coordinator
        .switch_mode(AssistantMode::Mirror)
        .await
        .unwrap();

    // Exactly one disconnect then one connect, with the new instruction
    // and zeroed VAD state.
    let setup = wait_for_frame_containing(&mut server.incoming, "\"setup\"").await;
    assert!(setup.contains("talking mirror"));
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
    assert!(harness.script.resets() >= 1);

    server
        .inject
        .send(Inject::Text(r#"{"setupComplete":{}}"#.to_string()))
        .unwrap();
    wait_for_state(&mut state_rx, |s| *s == AssistantState::Listening).await;

    // Switching to the current mode is a no-op.
    harness
        .coordinator
        .switch_mode(AssistantMode::Mirror)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn probability_is_published() {
    let mut server = mock_endpoint(1).await;
    let harness = harness(server.addr);
    let mut probability_rx = harness.coordinator.speech_probability();

    start_listening(&harness, &mut server, AssistantMode::Scene).await;

    harness.script.push(&[0.1, 0.1, 0.7]);
    harness.microphone_tx.send(mic_chunk(3)).await.unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            if (*probability_rx.borrow() - 0.7).abs() < f32::EPSILON {
                return;
            }
            probability_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("probability not published");
}
