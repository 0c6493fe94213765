//! Unified error handling for the client.

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Marketplace controller has stopped")]
    Stopped,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
