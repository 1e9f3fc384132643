//! SSH error types

use thiserror::Error;

/// Errors that can occur during SSH operations
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to load SSH key: {0}")]
    KeyLoad(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    #[error("SSH protocol error: {0}")]
    Protocol(String),
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

/// Result type for SSH operations
pub type SshResult<T> = std::result::Result<T, SshError>;
