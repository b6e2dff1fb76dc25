//! Error types shared by the engine crates.

use thiserror::Error;

/// Errors raised outside the GPU layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event-loop failures
    #[error("Window error: {0}")]
    Window(String),

    /// Malformed or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;
