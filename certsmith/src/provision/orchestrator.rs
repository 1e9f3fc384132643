//! Install and renew protocols

use certsmith_core::{CertInfo, CertificateRecord, parse_cert_info};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use super::commands::{
    CERTBOT_PRESENCE_PROBE, RENEW_COMMAND, certbot_install_steps, info_command, issuance_command,
    web_server_check,
};
use super::error::ProvisionError;
use super::steps::{StepFailure, run_steps};
use crate::crypto::CredentialProvider;
use crate::ssh::{
    Connector, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, RemoteSession, SshConfig,
};

const INSTALL_SUCCESS: &str = "Certificate installed successfully";
const RENEW_SUCCESS: &str = "Certificate renewed successfully";

/// Result handed back to callers of install/renew; never an error
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub message: String,
    pub record: CertificateRecord,
}

/// Runs the install and renew protocols against a record's host
pub struct Provisioner {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Provisioner {
    pub fn new(connector: Arc<dyn Connector>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            connector,
            credentials,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout = connect;
        self.command_timeout = command;
        self
    }

    /// Issue and install a certificate for the record's domains.
    ///
    /// On failure the record is forced to `failed` with the error message,
    /// except on cancellation, which only records the message.
    pub async fn install(
        &self,
        mut record: CertificateRecord,
        cancel: &CancellationToken,
    ) -> ProvisionOutcome {
        tracing::info!(id = record.id, domain = %record.domain, host = %record.server_ip, "Installing certificate");

        match self.with_session(&record, cancel, Operation::Install).await {
            Ok(info) => {
                record.record_install_success(&info, OffsetDateTime::now_utc());
                tracing::info!(id = record.id, status = %record.status, "Certificate installed");
                ProvisionOutcome {
                    success: true,
                    message: INSTALL_SUCCESS.to_string(),
                    record,
                }
            }
            Err(ProvisionError::Cancelled) => cancelled(record),
            Err(e) => {
                let message = e.to_string();
                tracing::error!(id = record.id, error = %message, "Certificate install failed");
                record.record_install_failure(message.clone());
                ProvisionOutcome {
                    success: false,
                    message,
                    record,
                }
            }
        }
    }

    /// Renew due certificates on the record's host and refresh its expiry.
    ///
    /// A failed renewal only sets the error message; status is kept.
    pub async fn renew(
        &self,
        mut record: CertificateRecord,
        cancel: &CancellationToken,
    ) -> ProvisionOutcome {
        tracing::info!(id = record.id, domain = %record.domain, host = %record.server_ip, "Renewing certificate");

        match self.with_session(&record, cancel, Operation::Renew).await {
            Ok(info) => {
                record.record_renew_success(&info, OffsetDateTime::now_utc());
                tracing::info!(id = record.id, status = %record.status, "Certificate renewed");
                ProvisionOutcome {
                    success: true,
                    message: RENEW_SUCCESS.to_string(),
                    record,
                }
            }
            Err(ProvisionError::Cancelled) => cancelled(record),
            Err(e) => {
                let message = e.to_string();
                tracing::error!(id = record.id, error = %message, "Certificate renewal failed");
                record.record_renew_failure(message.clone());
                ProvisionOutcome {
                    success: false,
                    message,
                    record,
                }
            }
        }
    }

    /// Open a session for `record`, run `operation`, and always disconnect.
    async fn with_session(
        &self,
        record: &CertificateRecord,
        cancel: &CancellationToken,
        operation: Operation,
    ) -> Result<CertInfo, ProvisionError> {
        checkpoint(cancel)?;

        let auth = self.credentials.reveal(&record.credential)?;
        let config = SshConfig::new(&record.server_ip, record.ssh_port, &record.ssh_username)
            .with_timeouts(self.connect_timeout, self.command_timeout);

        let mut session = self
            .connector
            .connect(config, auth)
            .await
            .map_err(|e| ProvisionError::Connection(e.to_string()))?;

        let result = match operation {
            Operation::Install => install_steps(session.as_ref(), record, cancel).await,
            Operation::Renew => renew_steps(session.as_ref(), record, cancel).await,
        };

        if let Err(e) = session.disconnect().await {
            tracing::warn!(id = record.id, error = %e, "Failed to close SSH session");
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Install,
    Renew,
}

async fn install_steps(
    session: &dyn RemoteSession,
    record: &CertificateRecord,
    cancel: &CancellationToken,
) -> Result<CertInfo, ProvisionError> {
    if !session.test_connection().await {
        return Err(ProvisionError::Connection(
            "connectivity probe failed".to_string(),
        ));
    }

    checkpoint(cancel)?;
    ensure_certbot(session, cancel).await?;

    checkpoint(cancel)?;
    let check = session
        .exec(web_server_check(record.web_server))
        .await
        .map_err(|source| ProvisionError::Remote {
            step: "web server check",
            source,
        })?;
    if !check.success() {
        return Err(ProvisionError::WebServerNotRunning(record.web_server));
    }

    checkpoint(cancel)?;
    let issued = session
        .exec(&issuance_command(record))
        .await
        .map_err(|e| ProvisionError::Issuance(e.to_string()))?;
    if !issued.success() {
        return Err(ProvisionError::Issuance(issued.combined().trim().to_string()));
    }

    Ok(query_cert_info(session, record).await)
}

async fn renew_steps(
    session: &dyn RemoteSession,
    record: &CertificateRecord,
    cancel: &CancellationToken,
) -> Result<CertInfo, ProvisionError> {
    checkpoint(cancel)?;
    let renewed = session
        .exec(RENEW_COMMAND)
        .await
        .map_err(|e| ProvisionError::Renewal(e.to_string()))?;
    if !renewed.success() {
        return Err(ProvisionError::Renewal(renewed.combined().trim().to_string()));
    }

    Ok(query_cert_info(session, record).await)
}

/// Install certbot unless it is already on the PATH
async fn ensure_certbot(
    session: &dyn RemoteSession,
    cancel: &CancellationToken,
) -> Result<(), ProvisionError> {
    let probe = session
        .exec(CERTBOT_PRESENCE_PROBE)
        .await
        .map_err(|source| ProvisionError::Remote {
            step: "certbot presence probe",
            source,
        })?;
    if probe.success() && !probe.stdout.trim().is_empty() {
        tracing::debug!(path = %probe.stdout.trim(), "certbot already installed");
        return Ok(());
    }

    tracing::info!("certbot not found, installing");
    run_steps(session, &certbot_install_steps(), cancel)
        .await
        .map_err(|failure| match failure {
            StepFailure::Exit { step, output } => ProvisionError::ToolInstall {
                step,
                output: output.combined().trim().to_string(),
            },
            StepFailure::Exec { step, source } => ProvisionError::ToolInstall {
                step,
                output: source.to_string(),
            },
            StepFailure::Cancelled => ProvisionError::Cancelled,
        })
}

/// Info query never fails the operation; problems become warnings.
async fn query_cert_info(session: &dyn RemoteSession, record: &CertificateRecord) -> CertInfo {
    let output = match session.exec(&info_command(&record.domain)).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(id = record.id, error = %e, "Certificate info query failed");
            return CertInfo::default();
        }
    };
    if !output.success() {
        tracing::warn!(id = record.id, exit_code = output.exit_code, "Certificate info query returned no listing");
    }

    let info = parse_cert_info(&output.stdout);
    for warning in &info.warnings {
        tracing::warn!(id = record.id, domain = %record.domain, "{}", warning);
    }
    info
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), ProvisionError> {
    if cancel.is_cancelled() {
        Err(ProvisionError::Cancelled)
    } else {
        Ok(())
    }
}

fn cancelled(mut record: CertificateRecord) -> ProvisionOutcome {
    let message = ProvisionError::Cancelled.to_string();
    tracing::warn!(id = record.id, "Operation cancelled");
    record.error_message = Some(message.clone());
    ProvisionOutcome {
        success: false,
        message,
        record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionKey, KeyCredentialProvider, PlainCredentialProvider};
    use crate::ssh::fake::FakeConnector;
    use crate::store::test_support::new_cert;
    use certsmith_core::CertStatus;
    use time::macros::datetime;

    const LISTING: &str = "\
  Certificate Name: example.com
    Domains: example.com www.example.com
    Expiry Date: 2099-03-01 12:30:00+00:00 (VALID: 89 days)
    Certificate Path: /etc/letsencrypt/live/example.com/fullchain.pem
    Private Key Path: /etc/letsencrypt/live/example.com/privkey.pem
";

    fn record() -> CertificateRecord {
        CertificateRecord::from_new(
            7,
            new_cert("example.com", "203.0.113.10"),
            datetime!(2025-06-01 12:00 UTC),
        )
    }

    fn provisioner(fake: &FakeConnector) -> Provisioner {
        Provisioner::new(Arc::new(fake.clone()), Arc::new(PlainCredentialProvider))
    }

    fn healthy_host() -> FakeConnector {
        let fake = FakeConnector::new();
        fake.respond("which certbot", 0, "/usr/bin/certbot\n")
            .respond("sudo certbot certificates", 0, LISTING);
        fake
    }

    #[tokio::test]
    async fn install_success_activates_record_and_disconnects() {
        let fake = healthy_host();
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, "Certificate installed successfully");
        assert_eq!(outcome.record.status, CertStatus::Active);
        assert_eq!(
            outcome.record.expires_at,
            Some(datetime!(2099-03-01 12:30 UTC))
        );
        assert_eq!(
            outcome.record.private_key_path.as_deref(),
            Some("/etc/letsencrypt/live/example.com/privkey.pem")
        );
        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.disconnects(), 1);
        assert_eq!(fake.auth_methods(), vec!["password"]);
    }

    #[tokio::test]
    async fn install_against_unreachable_host_fails_with_connection_message() {
        let fake = FakeConnector::new();
        fake.refuse("203.0.113.10");
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Failed);
        assert!(outcome.message.starts_with("Failed to connect to server"));
        assert_eq!(outcome.record.error_message.as_deref(), Some(outcome.message.as_str()));
        assert!(fake.commands().is_empty());
    }

    #[tokio::test]
    async fn present_certbot_skips_install_sequence() {
        let fake = healthy_host();
        provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        let commands = fake.commands();
        assert!(!commands.iter().any(|c| c.contains("apt update")));
        assert!(!commands.iter().any(|c| c.contains("snap install")));
        assert_eq!(commands[0], "echo \"Connection test successful\"");
        assert_eq!(commands[1], "which certbot");
    }

    #[tokio::test]
    async fn connectivity_probe_failure_forces_failed() {
        let fake = healthy_host();
        fake.respond("Connection test successful", 1, "");
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Failed);
        assert_eq!(
            outcome.message,
            "Failed to connect to server: connectivity probe failed"
        );
        assert!(!fake.commands().iter().any(|c| c == "which certbot"));
        assert_eq!(fake.disconnects(), 1);
    }

    #[tokio::test]
    async fn missing_certbot_runs_install_sequence_in_order() {
        let fake = FakeConnector::new();
        fake.respond("sudo certbot certificates", 0, LISTING);
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(outcome.success, "{}", outcome.message);
        let commands = fake.commands();
        let apt = commands.iter().position(|c| c == "sudo apt update").unwrap();
        let snap = commands
            .iter()
            .position(|c| c == "sudo snap install --classic certbot")
            .unwrap();
        let link = commands
            .iter()
            .position(|c| c.starts_with("sudo ln -sf"))
            .unwrap();
        assert!(apt < snap && snap < link);
    }

    #[tokio::test]
    async fn install_sequence_failure_names_step_and_stops() {
        let fake = FakeConnector::new();
        fake.respond("sudo snap install core", 1, "");
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Failed);
        assert!(outcome.message.contains("install snap core"), "{}", outcome.message);
        let commands = fake.commands();
        assert!(!commands.iter().any(|c| c.contains("--classic certbot")));
        assert!(!commands.iter().any(|c| c.contains("--agree-tos")));
        assert_eq!(fake.disconnects(), 1);
    }

    #[tokio::test]
    async fn stopped_web_server_fails_before_issuance() {
        let fake = healthy_host();
        fake.respond("systemctl is-active --quiet nginx", 3, "");
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Web server (nginx) is not running");
        assert!(!fake.commands().iter().any(|c| c.contains("--agree-tos")));
    }

    #[tokio::test]
    async fn issuance_failure_carries_tool_output() {
        let fake = healthy_host();
        fake.respond("--agree-tos", 1, "Challenge failed for domain example.com");
        let outcome = provisioner(&fake)
            .install(record(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Failed);
        assert!(outcome.message.starts_with("Certificate request failed: "));
        assert!(outcome.message.contains("Challenge failed for domain example.com"));
    }

    #[tokio::test]
    async fn partial_listing_still_succeeds() {
        let fake = FakeConnector::new();
        let partial: String = LISTING
            .lines()
            .filter(|l| !l.contains("Private Key Path"))
            .collect::<Vec<_>>()
            .join("\n");
        fake.respond("which certbot", 0, "/usr/bin/certbot")
            .respond("sudo certbot certificates", 0, &partial);

        let mut rec = record();
        rec.private_key_path = Some("/old/privkey.pem".to_string());
        let outcome = provisioner(&fake)
            .install(rec, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert!(outcome.record.expires_at.is_some());
        assert!(outcome.record.certificate_path.is_some());
        assert_eq!(
            outcome.record.private_key_path.as_deref(),
            Some("/old/privkey.pem")
        );
    }

    #[tokio::test]
    async fn renew_failure_keeps_status() {
        let fake = FakeConnector::new();
        fake.respond("certbot renew", 1, "Failed to renew certificate example.com");

        let mut rec = record();
        rec.status = CertStatus::Active;
        rec.expires_at = Some(datetime!(2099-01-01 0:00 UTC));
        let outcome = provisioner(&fake)
            .renew(rec, &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Active);
        assert!(outcome.message.starts_with("Certificate renewal failed: "));
        assert_eq!(outcome.record.error_message.as_deref(), Some(outcome.message.as_str()));
    }

    #[tokio::test]
    async fn renew_connection_failure_keeps_status() {
        let fake = FakeConnector::new();
        fake.refuse("203.0.113.10");

        let mut rec = record();
        rec.status = CertStatus::Expiring;
        let outcome = provisioner(&fake)
            .renew(rec, &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Expiring);
        assert!(outcome.message.starts_with("Failed to connect to server"));
    }

    #[tokio::test]
    async fn renew_success_refreshes_expiry_and_clears_error() {
        let fake = FakeConnector::new();
        fake.respond("sudo certbot certificates", 0, LISTING);

        let mut rec = record();
        rec.status = CertStatus::Active;
        rec.expires_at = Some(datetime!(2098-01-01 0:00 UTC));
        rec.error_message = Some("previous failure".to_string());
        let outcome = provisioner(&fake)
            .renew(rec, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.message, "Certificate renewed successfully");
        assert_eq!(
            outcome.record.expires_at,
            Some(datetime!(2099-03-01 12:30 UTC))
        );
        assert!(outcome.record.last_renewed_at.is_some());
        assert!(outcome.record.error_message.is_none());
        assert_eq!(
            fake.commands(),
            vec![
                "sudo certbot renew --non-interactive".to_string(),
                "sudo certbot certificates | grep -A 10 'example.com'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_install_leaves_status_and_never_connects() {
        let fake = healthy_host();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = provisioner(&fake).install(record(), &cancel).await;

        assert!(!outcome.success);
        assert_eq!(outcome.record.status, CertStatus::Pending);
        assert_eq!(outcome.message, "Operation cancelled");
        assert_eq!(fake.connects(), 0);
    }

    #[tokio::test]
    async fn undecryptable_credential_fails_without_connecting() {
        let fake = healthy_host();
        let provisioner = Provisioner::new(
            Arc::new(fake.clone()),
            Arc::new(KeyCredentialProvider::new(EncryptionKey::generate().unwrap())),
        );
        let outcome = provisioner
            .install(record(), &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Failed to decrypt SSH credential"));
        assert_eq!(outcome.record.status, CertStatus::Failed);
        assert_eq!(fake.connects(), 0);
    }

    #[tokio::test]
    async fn webroot_mode_issues_certonly_without_redirect() {
        let fake = healthy_host();
        let mut rec = record();
        rec.webroot_path = Some("/var/www/example".to_string());
        provisioner(&fake)
            .install(rec, &CancellationToken::new())
            .await;

        let issuance = fake
            .commands()
            .into_iter()
            .find(|c| c.contains("--agree-tos"))
            .unwrap();
        assert!(issuance.contains("certonly --webroot -w '/var/www/example'"));
        assert!(!issuance.contains("--redirect"));
    }
}
