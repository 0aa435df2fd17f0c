//! Top-level error type
//!
//! Component crates define their own error enums and convert into this
//! type at the application boundary.

use thiserror::Error;

/// Top-level assistant error
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Result alias using the top-level error
pub type Result<T> = std::result::Result<T, Error>;
