//! Error types for Tunnelium

use thiserror::Error;

/// Main error type for Tunnelium
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("UDP proxy only enabled for DNS (port 53), requested port {0}")]
    UnsupportedUdpTarget(u16),

    #[error("Dial failed: {0}")]
    Dial(String),

    #[error("Stream fault: {0}")]
    StreamFault(String),

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias for Tunnelium
pub type Result<T> = std::result::Result<T, Error>;
