//! Live session client
//!
//! Owns the bidirectional transport to the remote model: connection
//! lifecycle, the setup handshake, framed send/receive, and reconnection
//! with exponential backoff. Model audio arrives on a PCM channel; turn
//! boundaries and connection changes are published as events and state.

pub mod client;
pub mod wire;

pub use client::LiveClient;
pub use wire::{ClientMessage, ServerMessage};

use thiserror::Error;

/// Connection state of the live session.
///
/// Outgoing media and turn signals are accepted only while
/// [`can_send_messages`](ConnectionState::can_send_messages) is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Transport opening
    Connecting,
    /// Transport open, setup sent, awaiting acknowledgement
    Initializing,
    /// Handshake complete, ready for media
    Connected,
    /// Model currently emitting a response
    Streaming,
    /// Unclean close, attempting to reconnect
    Reconnecting { attempt: u32, max: u32 },
    /// Fatal failure
    Error(String),
}

impl ConnectionState {
    /// Whether outgoing media and turn signals are accepted.
    pub fn can_send_messages(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }

    /// Whether a session is underway (anything but Disconnected/Error).
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Error(_))
    }
}

/// Events published by the session client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Setup acknowledged; media may flow
    Ready,
    /// The model finished its turn
    TurnComplete,
    /// The turn was taken back from the model (local or remote)
    Interrupted,
    /// Reconnection budget exhausted
    ConnectionLost,
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Transport endpoint URL
    pub endpoint: String,
    /// Optional API credential, appended as a `key` query parameter
    pub credential: Option<String>,
    /// Model identifier
    pub model: String,
    /// Prebuilt voice identifier
    pub voice: String,
    /// Maximum reconnection attempts per disconnect
    pub reconnect_max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds
    pub reconnect_base_delay_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            credential: None,
            model: "models/gemini-2.0-flash-exp".to_string(),
            voice: "Aoede".to_string(),
            reconnect_max_attempts: 5,
            reconnect_base_delay_ms: 1000,
        }
    }
}

impl LiveConfig {
    /// Endpoint URL with the credential appended when configured.
    ///
    /// Without a credential the endpoint is assumed to route through a
    /// credential proxy.
    pub fn connect_url(&self) -> String {
        match &self.credential {
            Some(key) => format!("{}?key={}", self.endpoint, key),
            None => self.endpoint.clone(),
        }
    }
}

/// Per-frame codec errors. Non-fatal: the offending frame is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("No recognized message variant")]
    UnexpectedVariant,
}

/// Session client errors
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Not connected")]
    NotConnected,
}

impl From<LiveError> for vanta_core::Error {
    fn from(err: LiveError) -> Self {
        vanta_core::Error::Session(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_send_messages() {
        assert!(ConnectionState::Connected.can_send_messages());
        assert!(ConnectionState::Streaming.can_send_messages());
        assert!(!ConnectionState::Disconnected.can_send_messages());
        assert!(!ConnectionState::Connecting.can_send_messages());
        assert!(!ConnectionState::Initializing.can_send_messages());
        assert!(!ConnectionState::Reconnecting { attempt: 1, max: 5 }.can_send_messages());
        assert!(!ConnectionState::Error("boom".into()).can_send_messages());
    }

    #[test]
    fn test_is_active() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Streaming.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Error("boom".into()).is_active());
    }

    #[test]
    fn test_connect_url() {
        let mut config = LiveConfig {
            endpoint: "wss://example.test/live".to_string(),
            ..Default::default()
        };
        assert_eq!(config.connect_url(), "wss://example.test/live");

        config.credential = Some("secret".to_string());
        assert_eq!(config.connect_url(), "wss://example.test/live?key=secret");
    }
}
