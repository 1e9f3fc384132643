//! Named command sequences that stop at the first failure

use tokio_util::sync::CancellationToken;

use crate::ssh::{CommandOutput, RemoteSession, SshError};

/// A remote command with a human-readable name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub command: String,
}

impl Step {
    pub fn new(name: &'static str, command: impl Into<String>) -> Self {
        Self {
            name,
            command: command.into(),
        }
    }
}

/// Where a step sequence stopped
#[derive(Debug)]
pub enum StepFailure {
    /// Command ran and exited non-zero
    Exit {
        step: &'static str,
        output: CommandOutput,
    },
    /// Command could not be run
    Exec {
        step: &'static str,
        source: SshError,
    },
    Cancelled,
}

impl StepFailure {
    pub fn step(&self) -> Option<&'static str> {
        match self {
            StepFailure::Exit { step, .. } | StepFailure::Exec { step, .. } => Some(*step),
            StepFailure::Cancelled => None,
        }
    }
}

/// Run `steps` in order; the first failing step aborts the rest.
pub async fn run_steps(
    session: &dyn RemoteSession,
    steps: &[Step],
    cancel: &CancellationToken,
) -> Result<(), StepFailure> {
    for step in steps {
        if cancel.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }
        tracing::info!(step = step.name, "Running step");
        match session.exec(&step.command).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                tracing::debug!(step = step.name, exit_code = output.exit_code, "Step failed");
                return Err(StepFailure::Exit {
                    step: step.name,
                    output,
                });
            }
            Err(source) => {
                return Err(StepFailure::Exec {
                    step: step.name,
                    source,
                });
            }
        }
    }
    Ok(())
}
