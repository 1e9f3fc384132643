use std::path::{Path, PathBuf};

use certsmith_core::{
    AuthKind, CertificateId, CertificateRecord, NewCertificate, WebServer, days_until_expiry,
};
use clap::{Args, Subcommand};
use time::OffsetDateTime;

use super::{Context, cancel_on_ctrl_c};
use crate::crypto::Secret;
use crate::output;
use crate::provision::ProvisionOutcome;

#[derive(Subcommand)]
pub enum CertsCommands {
    /// Register a certificate and, unless --no-install, issue it now
    Add(AddArgs),

    /// List all certificates
    #[command(visible_alias = "list")]
    Ls,

    /// Show one certificate
    Show {
        /// Certificate id
        id: CertificateId,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Issue and install a certificate on its server
    Install {
        /// Certificate id
        id: CertificateId,
    },

    /// Renew a certificate now
    Renew {
        /// Certificate id
        id: CertificateId,
    },

    /// Remove a certificate record
    #[command(visible_aliases = ["remove", "delete"])]
    Rm {
        /// Certificate id
        id: CertificateId,
    },

    /// Toggle automatic renewal
    AutoRenew {
        /// Certificate id
        id: CertificateId,
    },

    /// Count certificates per status
    Stats {
        /// Print counts as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct AddArgs {
    /// Primary domain
    #[arg(long)]
    pub domain: String,

    /// Additional domain (repeatable, or comma separated)
    #[arg(long = "alt-domain", value_name = "DOMAIN")]
    pub alt_domains: Vec<String>,

    /// Contact email for the certificate authority
    #[arg(long)]
    pub email: String,

    /// Server IP address
    #[arg(long, value_name = "IP")]
    pub host: String,

    /// Server hostname, for display
    #[arg(long)]
    pub hostname: Option<String>,

    /// SSH port (defaults to ssh.default_port)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSH username
    #[arg(long)]
    pub user: String,

    /// SSH authentication: password or key
    #[arg(long)]
    pub auth: AuthKind,

    /// Environment variable holding the SSH password
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,

    /// Private key file (unencrypted OpenSSH or PEM)
    #[arg(long, value_name = "PATH")]
    pub key_file: Option<PathBuf>,

    /// Web server on the host: nginx or apache
    #[arg(long)]
    pub web_server: WebServer,

    /// Serve challenges from this document root instead of the web server plugin
    #[arg(long, value_name = "PATH")]
    pub webroot: Option<String>,

    /// Do not renew automatically
    #[arg(long)]
    pub no_auto_renew: bool,

    /// Only store the record
    #[arg(long)]
    pub no_install: bool,
}

pub fn run(cmd: CertsCommands) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(cmd))
}

async fn run_async(cmd: CertsCommands) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::load()?;

    match cmd {
        CertsCommands::Add(args) => add(&ctx, args).await,
        CertsCommands::Ls => list(&ctx),
        CertsCommands::Show { id, json } => show(&ctx, id, json),
        CertsCommands::Install { id } => {
            output::step(&format!("Installing certificate #{}", id));
            let outcome = ctx.manager.install(id, &cancel_on_ctrl_c()).await?;
            report(outcome)
        }
        CertsCommands::Renew { id } => {
            output::step(&format!("Renewing certificate #{}", id));
            let outcome = ctx.manager.renew(id, &cancel_on_ctrl_c()).await?;
            report(outcome)
        }
        CertsCommands::Rm { id } => {
            if !ctx.manager.delete(id).await? {
                return Err(format!("Certificate #{} not found", id).into());
            }
            output::success(&format!("Removed certificate #{}", id));
            Ok(())
        }
        CertsCommands::AutoRenew { id } => {
            let record = ctx.manager.toggle_auto_renew(id).await?;
            let state = if record.auto_renew { "enabled" } else { "disabled" };
            output::success(&format!(
                "Auto-renew {} for {}",
                state,
                output::brand_accent(&record.domain)
            ));
            Ok(())
        }
        CertsCommands::Stats { json } => stats(&ctx, json),
    }
}

async fn add(ctx: &Context, args: AddArgs) -> Result<(), Box<dyn std::error::Error>> {
    let plaintext = read_credential(
        args.auth,
        args.password_env.as_deref(),
        args.key_file.as_deref(),
    )?;
    let credential = ctx.credentials.seal(args.auth, &plaintext)?;

    let new = NewCertificate {
        domain: args.domain,
        domains: args.alt_domains,
        email: args.email,
        server_ip: args.host,
        server_hostname: args.hostname,
        ssh_port: args.port.unwrap_or(ctx.settings.ssh.default_port),
        ssh_username: args.user,
        credential,
        web_server: args.web_server,
        webroot_path: args.webroot,
        auto_renew: !args.no_auto_renew,
    };
    let record = ctx.manager.create(new)?;
    output::success(&format!(
        "Added certificate #{} for {}",
        record.id,
        output::brand_accent(record.domains.join(", "))
    ));

    if args.no_install {
        output::muted(&format!(
            "Run `certsmith certs install {}` to issue it.",
            record.id
        ));
        return Ok(());
    }

    output::step(&format!("Installing certificate #{}", record.id));
    let outcome = ctx.manager.install(record.id, &cancel_on_ctrl_c()).await?;
    report(outcome)
}

/// Plaintext credential from the environment variable or key file the auth kind calls for
fn read_credential(
    auth: AuthKind,
    password_env: Option<&str>,
    key_file: Option<&Path>,
) -> Result<Secret, String> {
    let secret = match auth {
        AuthKind::Password => {
            if key_file.is_some() {
                return Err("--key-file cannot be used with --auth password".to_string());
            }
            let var = password_env
                .ok_or_else(|| "--auth password requires --password-env VAR".to_string())?;
            let value = std::env::var(var)
                .map_err(|_| format!("Environment variable {} is not set", var))?;
            Secret::new(value)
        }
        AuthKind::Key => {
            if password_env.is_some() {
                return Err("--password-env cannot be used with --auth key".to_string());
            }
            let path = key_file.ok_or_else(|| "--auth key requires --key-file PATH".to_string())?;
            let value = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read key file {}: {}", path.display(), e))?;
            Secret::new(value)
        }
    };

    if secret.is_empty() {
        return Err(format!("Empty SSH {} credential", auth));
    }
    Ok(secret)
}

fn report(outcome: ProvisionOutcome) -> Result<(), Box<dyn std::error::Error>> {
    if !outcome.success {
        return Err(outcome.message.into());
    }

    output::success(&outcome.message);
    if outcome.record.expires_at.is_some() {
        output::field("Expires", &expiry_text(&outcome.record, OffsetDateTime::now_utc()));
    }
    if output::is_verbose()
        && let Some(path) = &outcome.record.certificate_path
    {
        output::field("Certificate", path);
    }
    Ok(())
}

fn list(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let records = ctx.manager.list()?;
    if records.is_empty() {
        output::muted("No certificates yet. Add one with `certsmith certs add`.");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    let width = records.iter().map(|r| r.domain.len()).max().unwrap_or(0);
    for record in &records {
        println!(
            "{:>4}  {:<width$}  {:<16}  {:<22}  {}",
            output::brand_muted(format!("#{}", record.id)),
            record.domain,
            record.server_ip,
            expiry_text(record, now),
            output::status_label(record.status),
            width = width,
        );
    }
    Ok(())
}

fn show(ctx: &Context, id: CertificateId, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let record = ctx.manager.get(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    output::section(&format!("#{} {}", record.id, record.domain));
    output::field("Status", &output::status_label(record.status));
    output::field("Domains", &record.domains.join(", "));
    output::field("Email", &record.email);
    let server = match &record.server_hostname {
        Some(hostname) => format!("{} ({})", hostname, record.server_ip),
        None => record.server_ip.clone(),
    };
    output::field("Server", &server);
    output::field(
        "SSH",
        &format!(
            "{}@{}:{} ({})",
            record.ssh_username, record.server_ip, record.ssh_port, record.ssh_auth_type
        ),
    );
    output::field("Web server", record.web_server.as_str());
    if let Some(webroot) = &record.webroot_path {
        output::field("Webroot", webroot);
    }
    output::field("Auto-renew", if record.auto_renew { "on" } else { "off" });
    output::field("Expires", &expiry_text(&record, now));
    output::field("Last renewed", &output::timestamp(record.last_renewed_at));
    for (label, path) in [
        ("Certificate", &record.certificate_path),
        ("Private key", &record.private_key_path),
        ("Full chain", &record.full_chain_path),
    ] {
        if let Some(path) = path {
            output::field(label, path);
        }
    }
    if let Some(error) = &record.error_message {
        output::field("Last error", &output::brand_error(error).to_string());
    }
    Ok(())
}

fn stats(ctx: &Context, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = ctx.manager.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    output::section("Certificates");
    for (label, count) in [
        ("Total", stats.total),
        ("Active", stats.active),
        ("Expiring", stats.expiring),
        ("Expired", stats.expired),
        ("Pending", stats.pending),
        ("Failed", stats.failed),
        ("Auto-renew", stats.auto_renew),
    ] {
        output::field(label, &count.to_string());
    }
    Ok(())
}

fn expiry_text(record: &CertificateRecord, now: OffsetDateTime) -> String {
    match record.expires_at {
        Some(expires) => format!(
            "{} ({}d)",
            output::timestamp(Some(expires)),
            days_until_expiry(expires, now)
        ),
        None => "-".to_string(),
    }
}
