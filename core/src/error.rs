//! Error types for the IRC bridge

use thiserror::Error;

/// Main error type for the IRC bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Command error: {0}")]
    Command(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
