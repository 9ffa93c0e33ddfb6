//! Common error types for simplydash components.

use std::fmt;

/// A specialized Result type for simplydash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for simplydash operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Healthcheck error: {0}")]
    Healthcheck(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new provider error.
    pub fn provider(msg: impl fmt::Display) -> Self {
        Error::Provider(msg.to_string())
    }

    /// Create a new healthcheck error.
    pub fn healthcheck(msg: impl fmt::Display) -> Self {
        Error::Healthcheck(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new transport error.
    pub fn transport(msg: impl fmt::Display) -> Self {
        Error::Transport(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
