//! TeamClaw error types

use thiserror::Error;

/// TeamClaw error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bus subject could not be constructed
    #[error("Subject error: {0}")]
    Subject(String),

    /// Agent process lifecycle error
    #[error("Process error: {0}")]
    Process(String),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(String),

    /// Bridge error
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for TeamClaw operations
pub type Result<T> = std::result::Result<T, Error>;
