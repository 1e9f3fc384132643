//! Periodic renewal sweep

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RenewalSettings;
use crate::manager::{CertificateManager, ManagerResult};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct RenewalScheduler {
    manager: Arc<CertificateManager>,
    interval: Duration,
    lookahead: time::Duration,
    concurrency: usize,
}

impl RenewalScheduler {
    pub fn new(manager: Arc<CertificateManager>, settings: &RenewalSettings) -> Self {
        Self {
            manager,
            interval: settings.interval(),
            lookahead: settings.lookahead(),
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Renew every due record once.
    ///
    /// Candidates are independent: one failing never stops the others.
    /// Cancellation is checked before each candidate starts; candidates not
    /// started are not counted as attempted.
    pub async fn sweep(&self, cancel: &CancellationToken) -> ManagerResult<SweepSummary> {
        let candidates = self
            .manager
            .store()
            .renewal_candidates(OffsetDateTime::now_utc(), self.lookahead)?;

        tracing::info!(candidates = candidates.len(), "Starting renewal sweep");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut summary = SweepSummary::default();

        for record in candidates {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if cancel.is_cancelled() {
                break;
            }

            summary.attempted += 1;
            let manager = self.manager.clone();
            let cancel = cancel.clone();
            let id = record.id;
            tasks.spawn(async move {
                let _permit = permit;
                match manager.renew(id, &cancel).await {
                    Ok(outcome) => outcome.success,
                    Err(e) => {
                        tracing::error!(id, error = %e, "Renewal could not run");
                        false
                    }
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Renewal task panicked");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Renewal sweep finished"
        );
        Ok(summary)
    }

    /// Sweep every interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_hours = self.interval.as_secs() / 3600,
            concurrency = self.concurrency,
            "Starting certificate renewal task"
        );

        loop {
            if let Err(e) = self.sweep(&cancel).await {
                tracing::error!(error = %e, "Renewal sweep failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Certificate renewal task stopped");
    }
}
