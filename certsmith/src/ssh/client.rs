//! SSH client implementation using russh

use super::error::{SshError, SshResult};
use crate::crypto::Secret;
use russh::client::{self, Config, Handle, Handler};
use russh::keys::{Algorithm, PrivateKey, PrivateKeyWithHashAlg, PublicKey, decode_secret_key};
use russh::{ChannelMsg, Disconnect};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default timeout for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single remote command (issuance can be slow)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(900);

/// Probe used by [`SshSession::test_connection`]
pub const CONNECTION_PROBE: &str = "echo \"Connection test successful\"";

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote hostname or IP
    pub host: String,
    /// SSH port (default 22)
    pub port: u16,
    /// Remote login user
    pub username: String,
    /// Connection + authentication timeout
    pub connect_timeout: Duration,
    /// Timeout applied to each command
    pub command_timeout: Duration,
}

impl SshConfig {
    pub fn new(host: &str, port: u16, username: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout = connect;
        self.command_timeout = command;
        self
    }

    fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Plaintext credential for one connection attempt.
///
/// Consumed by [`SshClient::connect`]; the secret is wiped once
/// authentication finishes.
pub enum SshAuth {
    Password(Secret),
    PrivateKey(Secret),
}

impl SshAuth {
    pub fn method(&self) -> &'static str {
        match self {
            SshAuth::Password(_) => "password",
            SshAuth::PrivateKey(_) => "publickey",
        }
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SshAuth::{}(<redacted>)", self.method())
    }
}

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success)
    pub exit_code: u32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr)
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Handler for SSH client events
pub struct SshHandler {
    accept_any_host_key: bool,
}

impl Handler for SshHandler {
    type Error = SshError;

    fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> impl Future<Output = std::result::Result<bool, Self::Error>> + Send {
        // Accept all keys (like ssh -o StrictHostKeyChecking=no)
        let accept = self.accept_any_host_key;
        async move { Ok(accept) }
    }
}

/// Unconnected client: target plus credential
pub struct SshClient {
    config: SshConfig,
    auth: SshAuth,
}

impl SshClient {
    pub fn new(config: SshConfig, auth: SshAuth) -> Self {
        Self { config, auth }
    }

    /// Connect and authenticate.
    ///
    /// Every failure before authentication succeeds is reported as an error;
    /// the returned session is always connected.
    pub async fn connect(self) -> SshResult<SshSession> {
        let SshClient { config, auth } = self;

        let ssh_config = Config {
            inactivity_timeout: Some(config.command_timeout),
            keepalive_interval: Some(Duration::from_secs(15)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = SshHandler {
            accept_any_host_key: true,
        };

        tracing::debug!(host = %config.host, port = config.port, user = %config.username, method = auth.method(), "Connecting to SSH server");

        let result = tokio::time::timeout(config.connect_timeout, async {
            let mut handle = client::connect(Arc::new(ssh_config), config.addr(), handler)
                .await
                .map_err(|e| SshError::Connection(e.to_string()))?;
            authenticate(&mut handle, &config.username, &auth).await?;
            Ok::<_, SshError>(handle)
        })
        .await;
        drop(auth);

        let handle = result.map_err(|_| SshError::Timeout("Connection timed out".to_string()))??;

        tracing::info!(host = %config.host, "SSH connection established");

        Ok(SshSession {
            config,
            handle: Some(handle),
        })
    }
}

async fn authenticate(
    handle: &mut Handle<SshHandler>,
    username: &str,
    auth: &SshAuth,
) -> SshResult<()> {
    let accepted = match auth {
        SshAuth::Password(password) => handle
            .authenticate_password(username, password.expose())
            .await
            .map_err(|e| SshError::Authentication(e.to_string()))?
            .success(),
        SshAuth::PrivateKey(pem) => {
            let key = load_private_key(pem)?;
            let hash_alg = if matches!(key.algorithm(), Algorithm::Rsa { .. }) {
                handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| SshError::Authentication(e.to_string()))?
                    .flatten()
            } else {
                None
            };
            handle
                .authenticate_publickey(
                    username,
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
                .map_err(|e| SshError::Authentication(e.to_string()))?
                .success()
        }
    };

    if accepted {
        tracing::debug!(user = %username, method = auth.method(), "Authentication successful");
        Ok(())
    } else {
        Err(SshError::Authentication(format!(
            "{} authentication rejected for user '{}'",
            auth.method(),
            username
        )))
    }
}

/// Decode an in-memory OpenSSH/PEM private key. Passphrase-protected keys are rejected.
pub fn load_private_key(pem: &Secret) -> SshResult<PrivateKey> {
    decode_secret_key(pem.expose(), None).map_err(|e| SshError::KeyLoad(e.to_string()))
}

/// An authenticated SSH session
pub struct SshSession {
    config: SshConfig,
    handle: Option<Handle<SshHandler>>,
}

impl SshSession {
    /// Execute a command on the remote server.
    ///
    /// A non-zero exit status is not an error here; callers inspect
    /// [`CommandOutput::success`].
    pub async fn exec(&self, command: &str) -> SshResult<CommandOutput> {
        let handle = self.handle.as_ref().ok_or(SshError::NotConnected)?;

        tracing::debug!(command = %command, "Executing remote command");

        let output = tokio::time::timeout(self.config.command_timeout, run_command(handle, command))
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "Command did not finish within {}s",
                    self.config.command_timeout.as_secs()
                ))
            })??;

        tracing::debug!(
            exit_code = output.exit_code,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "Command completed"
        );

        Ok(output)
    }

    /// Run a trivial probe. Never errors: any failure is `false`.
    pub async fn test_connection(&self) -> bool {
        match self.exec(CONNECTION_PROBE).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!(host = %self.config.host, error = %e, "Connection probe failed");
                false
            }
        }
    }

    /// Disconnect from the server. Safe to call more than once.
    pub async fn disconnect(&mut self) -> SshResult<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(|e| SshError::Connection(e.to_string()))?;
            tracing::debug!(host = %self.config.host, "SSH connection closed");
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn(async move {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
            });
        }
    }
}

async fn run_command(handle: &Handle<SshHandler>, command: &str) -> SshResult<CommandOutput> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SshError::Channel(e.to_string()))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::CommandFailed(e.to_string()))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    // exit-status may arrive after EOF; read until the channel closes.
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                stdout.extend_from_slice(&data);
            }
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    // stderr
                    stderr.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                exit_code = Some(exit_status);
            }
            _ => {}
        }
    }

    let exit_code =
        exit_code.ok_or_else(|| SshError::CommandFailed("no exit status".to_string()))?;

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}
