//! Wire codec for the live protocol
//!
//! Every transport frame is a single JSON object carrying exactly one
//! message variant. Variant keys are camelCase, all inner field names
//! are snake_case, and media bodies are base64 without line wrapping.
//! Decoding ignores unknown fields so newer server builds keep working.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Outgoing message. Externally tagged, so exactly one variant key is
/// ever present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Session configuration, the mandatory first frame after transport open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
}

/// Turn-structured client content (unused on the realtime path but part
/// of the protocol surface).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientContent {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub turns: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

/// Realtime media plus optional activity markers. The markers are empty
/// objects whose mere presence is the signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RealtimeInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_chunks: Vec<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_start: Option<ActivityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<ActivityMarker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityMarker {}

/// Tool call results echoed back to the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_responses: Vec<serde_json::Value>,
}

/// A piece of inline media: declared MIME type plus base64 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// One content entry: an ordered list of parts with an optional role.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Content {
    /// A single content wrapping one text part.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
            role: None,
        }
    }
}

/// Incoming message, one recognized variant per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetupComplete(SetupComplete),
    ServerContent(ServerContent),
    ToolCall(serde_json::Value),
    ToolCallCancellation(serde_json::Value),
    UsageMetadata(serde_json::Value),
    GoAway(serde_json::Value),
    SessionResumptionUpdate(serde_json::Value),
    InputTranscription(Transcription),
    OutputTranscription(Transcription),
}

/// Setup acknowledgement. Payload fields are irrelevant to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct SetupComplete {}

/// A slice of the model's turn.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// Raw decode target: every known variant as an optional field. The
/// first present variant wins; unrecognized siblings are ignored so the
/// codec stays forward-compatible.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<SetupComplete>,
    server_content: Option<ServerContent>,
    tool_call: Option<serde_json::Value>,
    tool_call_cancellation: Option<serde_json::Value>,
    usage_metadata: Option<serde_json::Value>,
    go_away: Option<serde_json::Value>,
    session_resumption_update: Option<serde_json::Value>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

impl RawServerMessage {
    fn into_message(self) -> Option<ServerMessage> {
        if let Some(v) = self.setup_complete {
            Some(ServerMessage::SetupComplete(v))
        } else if let Some(v) = self.server_content {
            Some(ServerMessage::ServerContent(v))
        } else if let Some(v) = self.tool_call {
            Some(ServerMessage::ToolCall(v))
        } else if let Some(v) = self.tool_call_cancellation {
            Some(ServerMessage::ToolCallCancellation(v))
        } else if let Some(v) = self.usage_metadata {
            Some(ServerMessage::UsageMetadata(v))
        } else if let Some(v) = self.go_away {
            Some(ServerMessage::GoAway(v))
        } else if let Some(v) = self.session_resumption_update {
            Some(ServerMessage::SessionResumptionUpdate(v))
        } else if let Some(v) = self.input_transcription {
            Some(ServerMessage::InputTranscription(v))
        } else {
            self.output_transcription.map(ServerMessage::OutputTranscription)
        }
    }
}

/// Encode an outgoing message as one JSON document.
pub fn encode_client(msg: &ClientMessage) -> Result<String, WireError> {
    serde_json::to_string(msg).map_err(|e| WireError::MalformedFrame(e.to_string()))
}

/// Decode one incoming frame.
pub fn decode_server(text: &str) -> Result<ServerMessage, WireError> {
    let raw: RawServerMessage =
        serde_json::from_str(text).map_err(|e| WireError::MalformedFrame(e.to_string()))?;
    raw.into_message().ok_or(WireError::UnexpectedVariant)
}
