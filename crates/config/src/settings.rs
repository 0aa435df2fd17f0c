//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Live session configuration
    #[serde(default)]
    pub session: SessionSettings,

    /// Camera capture configuration
    #[serde(default)]
    pub camera: CameraSettings,

    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Voice activity detection configuration
    #[serde(default)]
    pub vad: VadSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings against the documented ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=4).contains(&self.camera.fps) {
            return Err(ConfigError::InvalidValue {
                field: "camera.fps".to_string(),
                message: format!("must be between 1 and 4, got {}", self.camera.fps),
            });
        }

        if !(10..=100).contains(&self.camera.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                field: "camera.jpeg_quality".to_string(),
                message: format!("must be between 10 and 100, got {}", self.camera.jpeg_quality),
            });
        }

        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        for (field, value) in [
            ("vad.speech_threshold", self.vad.speech_threshold),
            ("vad.silence_threshold", self.vad.silence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be in [0, 1], got {}", value),
                });
            }
        }

        if self.vad.speech_threshold <= self.vad.silence_threshold {
            return Err(ConfigError::InvalidValue {
                field: "vad.speech_threshold".to_string(),
                message: format!(
                    "must be above vad.silence_threshold ({} <= {})",
                    self.vad.speech_threshold, self.vad.silence_threshold
                ),
            });
        }

        Ok(())
    }
}

/// Live session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Transport endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Optional API credential, appended as a `key` query parameter.
    /// When unset the endpoint is assumed to route through a credential
    /// proxy.
    #[serde(default)]
    pub credential: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Prebuilt voice identifier
    #[serde(default = "default_voice")]
    pub voice: String,
}

fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}
fn default_model() -> String {
    "models/gemini-2.0-flash-exp".to_string()
}
fn default_voice() -> String {
    "Aoede".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            credential: None,
            model: default_model(),
            voice: default_voice(),
        }
    }
}

/// Camera capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Frames per second (1-4)
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// JPEG compression quality (10-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u32,

    /// Capture width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Capture height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_fps() -> u32 {
    2
}
fn default_jpeg_quality() -> u32 {
    50
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            jpeg_quality: default_jpeg_quality(),
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Maximum reconnection attempts per disconnect
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Path to the speech-probability ONNX model
    #[serde(default = "default_vad_model")]
    pub model: String,

    /// Upper hysteresis threshold: probability at or above this starts speech
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,

    /// Lower hysteresis threshold: probability below this counts as silence
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,

    /// Minimum speech duration before a turn may end (ms)
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,

    /// Minimum trailing silence before a turn ends (ms)
    #[serde(default = "default_min_silence_ms")]
    pub min_silence_ms: u64,
}

fn default_vad_model() -> String {
    "models/silero_vad.onnx".to_string()
}
fn default_speech_threshold() -> f32 {
    0.5
}
fn default_silence_threshold() -> f32 {
    0.35
}
fn default_min_speech_ms() -> u64 {
    250
}
fn default_min_silence_ms() -> u64 {
    100
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            model: default_vad_model(),
            speech_threshold: default_speech_threshold(),
            silence_threshold: default_silence_threshold(),
            min_speech_ms: default_min_speech_ms(),
            min_silence_ms: default_min_silence_ms(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. `VANTA__`-prefixed environment variables
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VANTA")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.camera.fps, 2);
        assert_eq!(settings.camera.jpeg_quality, 50);
        assert_eq!(settings.camera.width, 640);
        assert_eq!(settings.camera.height, 480);
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.reconnect.base_delay_ms, 1000);
        assert_eq!(settings.vad.speech_threshold, 0.5);
        assert_eq!(settings.vad.silence_threshold, 0.35);
        assert_eq!(settings.vad.min_speech_ms, 250);
        assert_eq!(settings.vad.min_silence_ms, 100);
        assert!(settings.session.credential.is_none());
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_fps_range() {
        let mut settings = Settings::default();
        settings.camera.fps = 5;
        assert!(settings.validate().is_err());

        settings.camera.fps = 0;
        assert!(settings.validate().is_err());

        settings.camera.fps = 4;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_jpeg_quality_range() {
        let mut settings = Settings::default();
        settings.camera.jpeg_quality = 9;
        assert!(settings.validate().is_err());

        settings.camera.jpeg_quality = 100;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_threshold_ordering() {
        let mut settings = Settings::default();
        settings.vad.speech_threshold = 0.3;
        settings.vad.silence_threshold = 0.4;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_threshold_range() {
        let mut settings = Settings::default();
        settings.vad.speech_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_reconnect_attempts_rejected() {
        let mut settings = Settings::default();
        settings.reconnect.max_attempts = 0;
        assert!(settings.validate().is_err());
    }
}
