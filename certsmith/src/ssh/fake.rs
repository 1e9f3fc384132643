//! Scripted in-memory hosts for exercising provisioning without a network

use super::client::{CONNECTION_PROBE, CommandOutput, SshAuth, SshConfig};
use super::error::{SshError, SshResult};
use super::session::{Connector, RemoteSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Rule {
    host: Option<String>,
    pattern: String,
    output: CommandOutput,
}

#[derive(Default)]
struct State {
    rules: Mutex<Vec<Rule>>,
    refused: Mutex<Vec<String>>,
    log: Mutex<Vec<(String, String)>>,
    auth_methods: Mutex<Vec<&'static str>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Connector whose hosts answer commands from a script.
///
/// Commands without a matching rule succeed with empty output.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<State>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to any command containing `pattern`, on any host
    pub fn respond(&self, pattern: &str, exit_code: u32, stdout: &str) -> &Self {
        self.push_rule(None, pattern, exit_code, stdout);
        self
    }

    /// Reply to commands containing `pattern` on one host only
    pub fn respond_on(&self, host: &str, pattern: &str, exit_code: u32, stdout: &str) -> &Self {
        self.push_rule(Some(host), pattern, exit_code, stdout);
        self
    }

    /// Refuse connections to `host`
    pub fn refuse(&self, host: &str) -> &Self {
        self.state.refused.lock().push(host.to_string());
        self
    }

    /// Delay every command by `delay`
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *self.state.delay.lock() = delay;
        self
    }

    /// All executed commands, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.log.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.state
            .log
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn auth_methods(&self) -> Vec<&'static str> {
        self.state.auth_methods.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions seen
    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    fn push_rule(&self, host: Option<&str>, pattern: &str, exit_code: u32, stdout: &str) {
        let output = CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} failed", pattern)
            },
        };
        self.state.rules.lock().push(Rule {
            host: host.map(str::to_string),
            pattern: pattern.to_string(),
            output,
        });
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: SshConfig, auth: SshAuth) -> SshResult<Box<dyn RemoteSession>> {
        self.state.auth_methods.lock().push(auth.method());
        if self.state.refused.lock().contains(&config.host) {
            return Err(SshError::Connection(format!(
                "connection refused by {}",
                config.host
            )));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            host: config.host,
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct FakeSession {
    host: String,
    state: Arc<State>,
    open: bool,
}

impl FakeSession {
    fn lookup(&self, command: &str) -> CommandOutput {
        let rules = self.state.rules.lock();
        rules
            .iter()
            .filter(|r| r.host.as_deref() == Some(self.host.as_str()))
            .chain(rules.iter().filter(|r| r.host.is_none()))
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.output.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str) -> SshResult<CommandOutput> {
        if !self.open {
            return Err(SshError::NotConnected);
        }
        self.state
            .log
            .lock()
            .push((self.host.clone(), command.to_string()));
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lookup(command))
    }

    async fn test_connection(&self) -> bool {
        match self.exec(CONNECTION_PROBE).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }

    async fn disconnect(&mut self) -> SshResult<()> {
        if self.open {
            self.open = false;
            self.state.active.fetch_sub(1, Ordering::SeqCst);
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
