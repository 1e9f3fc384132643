//! Remote session seam
//!
//! Provisioning talks to hosts through [`Connector`] and [`RemoteSession`] so
//! the step logic does not depend on a live SSH server.

use super::client::{CommandOutput, SshAuth, SshClient, SshConfig, SshSession};
use super::error::SshResult;
use async_trait::async_trait;

/// A connected, authenticated shell on a remote host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command. Non-zero exit is reported in the output, not as an error.
    async fn exec(&self, command: &str) -> SshResult<CommandOutput>;

    /// Lightweight liveness probe; never fails
    async fn test_connection(&self) -> bool;

    /// Close the session. Idempotent.
    async fn disconnect(&mut self) -> SshResult<()>;
}

/// Opens remote sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: SshConfig, auth: SshAuth) -> SshResult<Box<dyn RemoteSession>>;
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> SshResult<CommandOutput> {
        SshSession::exec(self, command).await
    }

    async fn test_connection(&self) -> bool {
        SshSession::test_connection(self).await
    }

    async fn disconnect(&mut self) -> SshResult<()> {
        SshSession::disconnect(self).await
    }
}

/// [`Connector`] backed by real SSH connections
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: SshConfig, auth: SshAuth) -> SshResult<Box<dyn RemoteSession>> {
        let session = SshClient::new(config, auth).connect().await?;
        Ok(Box::new(session))
    }
}
