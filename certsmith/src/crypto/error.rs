//! Credential error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors sealing or revealing stored credentials
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Failed to read key file {0}: {1}")]
    KeyRead(PathBuf, std::io::Error),

    #[error("Failed to write key file {0}: {1}")]
    KeyWrite(PathBuf, std::io::Error),
}

/// Result type for credential operations
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;
