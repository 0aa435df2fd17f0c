//! Configuration for the Vanta assistant
//!
//! Settings are loaded in layers: `config/default`, an optional
//! environment-specific file, then `VANTA__`-prefixed environment
//! variables. All values have working defaults; validation enforces the
//! documented numeric ranges before anything else starts.

mod settings;

pub use settings::{
    load_settings, CameraSettings, ObservabilitySettings, ReconnectSettings, SessionSettings,
    Settings, VadSettings,
};

use thiserror::Error;

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl From<ConfigError> for vanta_core::Error {
    fn from(err: ConfigError) -> Self {
        vanta_core::Error::Config(err.to_string())
    }
}
