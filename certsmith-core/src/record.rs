//! Certificate record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::certinfo::CertInfo;
use crate::lifecycle::{self, CertStatus};

/// Store-assigned record identifier
pub type CertificateId = i64;

/// Record validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid domain '{0}'")]
    InvalidDomain(String),

    #[error("At least one domain is required")]
    NoDomains,

    #[error("Invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("Invalid server IP address '{0}'")]
    InvalidServerIp(String),

    #[error("SSH username cannot be empty")]
    EmptyUsername,

    #[error("Webroot path must be absolute: '{0}'")]
    RelativeWebroot(String),

    #[error("Credential does not match auth type '{0}'")]
    CredentialMismatch(AuthKind),

    #[error("Unknown {field} '{value}'")]
    UnknownVariant { field: &'static str, value: String },
}

/// Web server fronting the domains on the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebServer {
    Nginx,
    Apache,
}

impl WebServer {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebServer::Nginx => "nginx",
            WebServer::Apache => "apache",
        }
    }
}

impl fmt::Display for WebServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebServer {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nginx" => Ok(WebServer::Nginx),
            "apache" | "apache2" | "httpd" => Ok(WebServer::Apache),
            other => Err(RecordError::UnknownVariant {
                field: "web server",
                value: other.to_string(),
            }),
        }
    }
}

/// Which SSH credential a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Password,
    Key,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Password => "password",
            AuthKind::Key => "key",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthKind {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "password" => Ok(AuthKind::Password),
            "key" | "private-key" | "private_key" => Ok(AuthKind::Key),
            other => Err(RecordError::UnknownVariant {
                field: "auth type",
                value: other.to_string(),
            }),
        }
    }
}

/// SSH credential as persisted: encrypted text tagged by its kind.
///
/// Exactly one credential exists per record, so the tag and the populated
/// field can never disagree.
#[derive(Clone, PartialEq, Eq)]
pub enum SealedCredential {
    Password(String),
    PrivateKey(String),
}

impl SealedCredential {
    pub fn kind(&self) -> AuthKind {
        match self {
            SealedCredential::Password(_) => AuthKind::Password,
            SealedCredential::PrivateKey(_) => AuthKind::Key,
        }
    }

    /// The sealed (encrypted) payload
    pub fn sealed(&self) -> &str {
        match self {
            SealedCredential::Password(s) | SealedCredential::PrivateKey(s) => s,
        }
    }

    /// Rebuild from a tag plus the two nullable storage columns.
    pub fn from_columns(
        kind: AuthKind,
        password: Option<String>,
        private_key: Option<String>,
    ) -> Result<Self, RecordError> {
        match (kind, password, private_key) {
            (AuthKind::Password, Some(p), None) if !p.is_empty() => {
                Ok(SealedCredential::Password(p))
            }
            (AuthKind::Key, None, Some(k)) if !k.is_empty() => Ok(SealedCredential::PrivateKey(k)),
            (kind, _, _) => Err(RecordError::CredentialMismatch(kind)),
        }
    }

    /// Split into `(password, private_key)` storage columns
    pub fn to_columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            SealedCredential::Password(p) => (Some(p), None),
            SealedCredential::PrivateKey(k) => (None, Some(k)),
        }
    }
}

impl fmt::Debug for SealedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedCredential({}, <redacted>)", self.kind())
    }
}

/// Input for creating a record
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub domain: String,
    /// Additional domains; the primary is added if missing
    pub domains: Vec<String>,
    pub email: String,
    pub server_ip: String,
    pub server_hostname: Option<String>,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub credential: SealedCredential,
    pub web_server: WebServer,
    pub webroot_path: Option<String>,
    pub auto_renew: bool,
}

impl NewCertificate {
    /// Validate and normalize (domain list always contains the primary first)
    pub fn validated(mut self) -> Result<Self, RecordError> {
        self.domain = self.domain.trim().to_ascii_lowercase();
        validate_domain(&self.domain)?;

        let mut extra = Vec::with_capacity(self.domains.len());
        for d in self.domains.iter().flat_map(|entry| entry.split(',')) {
            let d = d.trim().to_ascii_lowercase();
            if d.is_empty() {
                continue;
            }
            validate_domain(&d)?;
            extra.push(d);
        }
        self.domains = normalize_domains(&self.domain, &extra);

        self.email = self.email.trim().to_string();
        validate_email(&self.email)?;

        self.server_ip = self.server_ip.trim().to_string();
        if self.server_ip.parse::<IpAddr>().is_err() {
            return Err(RecordError::InvalidServerIp(self.server_ip));
        }

        self.ssh_username = self.ssh_username.trim().to_string();
        if self.ssh_username.is_empty() {
            return Err(RecordError::EmptyUsername);
        }

        self.server_hostname = self
            .server_hostname
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        self.webroot_path = self
            .webroot_path
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if let Some(path) = &self.webroot_path
            && !path.starts_with('/')
        {
            return Err(RecordError::RelativeWebroot(path.clone()));
        }

        if self.credential.sealed().is_empty() {
            return Err(RecordError::CredentialMismatch(self.credential.kind()));
        }

        Ok(self)
    }
}

/// A managed certificate and its remote target
#[derive(Debug, Clone, Serialize)]
pub struct CertificateRecord {
    pub id: CertificateId,
    pub domain: String,
    pub domains: Vec<String>,
    pub email: String,
    pub server_ip: String,
    pub server_hostname: Option<String>,
    pub ssh_port: u16,
    pub ssh_username: String,
    #[serde(skip)]
    pub credential: SealedCredential,
    pub ssh_auth_type: AuthKind,
    pub web_server: WebServer,
    pub webroot_path: Option<String>,
    pub auto_renew: bool,
    pub status: CertStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub certificate_path: Option<String>,
    pub private_key_path: Option<String>,
    pub full_chain_path: Option<String>,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_renewed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CertificateRecord {
    /// A freshly created record: `pending`, nothing issued
    pub fn from_new(id: CertificateId, new: NewCertificate, now: OffsetDateTime) -> Self {
        let ssh_auth_type = new.credential.kind();
        Self {
            id,
            domain: new.domain,
            domains: new.domains,
            email: new.email,
            server_ip: new.server_ip,
            server_hostname: new.server_hostname,
            ssh_port: new.ssh_port,
            ssh_username: new.ssh_username,
            credential: new.credential,
            ssh_auth_type,
            web_server: new.web_server,
            webroot_path: new.webroot_path,
            auto_renew: new.auto_renew,
            status: CertStatus::Pending,
            expires_at: None,
            certificate_path: None,
            private_key_path: None,
            full_chain_path: None,
            error_message: None,
            last_renewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Domains passed to the issuance command, deduplicated, primary first
    pub fn issuance_domains(&self) -> Vec<String> {
        normalize_domains(&self.domain, &self.domains)
    }

    /// Status as it should be displayed right now, without mutating
    pub fn current_status(&self, now: OffsetDateTime) -> CertStatus {
        lifecycle::next_status(self.status, self.expires_at, now)
    }

    /// Re-apply the transition function. Returns true if the status changed.
    pub fn refresh_status(&mut self, now: OffsetDateTime) -> bool {
        let next = self.current_status(now);
        let changed = next != self.status;
        self.status = next;
        changed
    }

    /// Eligible for the renewal sweep
    pub fn is_due_for_renewal(&self, now: OffsetDateTime, lookahead: Duration) -> bool {
        self.auto_renew
            && self.status != CertStatus::Failed
            && self.expires_at.is_some_and(|exp| {
                now.checked_add(lookahead).is_none_or(|limit| exp <= limit)
            })
    }

    /// Issuance succeeded. Parsed fields overwrite; absent ones are kept.
    pub fn record_install_success(&mut self, info: &CertInfo, now: OffsetDateTime) {
        self.status = CertStatus::Active;
        self.apply_cert_info(info);
        self.error_message = None;
        self.refresh_status(now);
    }

    /// Issuance failed: forced to `failed`
    pub fn record_install_failure(&mut self, message: impl Into<String>) {
        self.status = CertStatus::Failed;
        self.error_message = Some(message.into());
    }

    /// Renewal succeeded: refresh expiry, stamp, recompute status
    pub fn record_renew_success(&mut self, info: &CertInfo, now: OffsetDateTime) {
        if let Some(exp) = info.expires_at {
            self.expires_at = Some(exp);
        }
        self.last_renewed_at = Some(now);
        self.error_message = None;
        self.refresh_status(now);
    }

    /// Renewal failed: only the error message changes.
    ///
    /// A still-valid certificate must not be reported as failed.
    pub fn record_renew_failure(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    /// Flip auto-renew; status, expiry and paths are untouched
    pub fn toggle_auto_renew(&mut self) -> bool {
        self.auto_renew = !self.auto_renew;
        self.auto_renew
    }

    fn apply_cert_info(&mut self, info: &CertInfo) {
        if let Some(exp) = info.expires_at {
            self.expires_at = Some(exp);
        }
        if let Some(path) = &info.certificate_path {
            self.certificate_path = Some(path.clone());
        }
        if let Some(path) = &info.private_key_path {
            self.private_key_path = Some(path.clone());
        }
    }
}

/// Primary first, then the rest; trimmed, deduplicated, empties dropped.
///
/// Entries containing commas are split, matching how domain lists are
/// entered by hand.
pub fn normalize_domains(primary: &str, domains: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let candidates = std::iter::once(primary).chain(domains.iter().map(String::as_str));
    for entry in candidates {
        for d in entry.split(',') {
            let d = d.trim();
            if d.is_empty() || out.iter().any(|existing| existing == d) {
                continue;
            }
            out.push(d.to_string());
        }
    }
    out
}

/// Hostname check for names certbot can validate over HTTP
pub fn validate_domain(domain: &str) -> Result<(), RecordError> {
    let invalid = || RecordError::InvalidDomain(domain.to_string());

    if domain.is_empty() {
        return Err(RecordError::NoDomains);
    }
    if domain.len() > 253 || !domain.contains('.') {
        return Err(invalid());
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid());
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid());
        }
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), RecordError> {
    let invalid = || RecordError::InvalidEmail(email.to_string());
    let (local, host) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || host.is_empty()
        || host.contains('@')
        || !host.contains('.')
        || email.chars().any(|c| c.is_whitespace() || c == '\'')
    {
        return Err(invalid());
    }
    Ok(())
}
