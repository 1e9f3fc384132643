use certsmith_core::WebServer;
use thiserror::Error;

use crate::crypto::CredentialError;
use crate::ssh::SshError;

/// Why an install or renew did not complete
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to connect to server: {0}")]
    Connection(String),

    #[error("Failed to install Certbot ({step}): {output}")]
    ToolInstall { step: &'static str, output: String },

    #[error("Web server ({0}) is not running")]
    WebServerNotRunning(WebServer),

    #[error("Certificate request failed: {0}")]
    Issuance(String),

    #[error("Certificate renewal failed: {0}")]
    Renewal(String),

    #[error("Failed to decrypt SSH credential: {0}")]
    Credential(#[from] CredentialError),

    #[error("{step} failed: {source}")]
    Remote {
        step: &'static str,
        #[source]
        source: SshError,
    },

    #[error("Operation cancelled")]
    Cancelled,
}
