//! Remote command surface spoken to managed hosts

use certsmith_core::{CertificateRecord, WebServer};

use super::steps::Step;

/// Locates the certbot executable; present iff exit 0 with non-empty output
pub const CERTBOT_PRESENCE_PROBE: &str = "which certbot";

/// Renews every certificate certbot considers due
pub const RENEW_COMMAND: &str = "sudo certbot renew --non-interactive";

/// Lines of context kept after the domain match in the info query
const INFO_CONTEXT_LINES: u32 = 10;

/// Ordered certbot install sequence
pub fn certbot_install_steps() -> Vec<Step> {
    vec![
        Step::new("refresh package index", "sudo apt update"),
        Step::new(
            "install snap core",
            "sudo snap install core; sudo snap refresh core",
        ),
        Step::new("install certbot", "sudo snap install --classic certbot"),
        Step::new(
            "link certbot",
            "sudo ln -sf /snap/bin/certbot /usr/bin/certbot || true",
        ),
    ]
}

/// Executable present AND service active
pub fn web_server_check(web_server: WebServer) -> &'static str {
    match web_server {
        WebServer::Nginx => "which nginx && systemctl is-active --quiet nginx",
        WebServer::Apache => "which apache2 && systemctl is-active --quiet apache2",
    }
}

/// Issuance command for a record.
///
/// With a webroot path: `certonly --webroot`, no redirect. Otherwise the web
/// server plugin with `--redirect`.
pub fn issuance_command(record: &CertificateRecord) -> String {
    let domains = record
        .issuance_domains()
        .iter()
        .map(|d| format!("-d {}", shell_quote(d)))
        .collect::<Vec<_>>()
        .join(" ");
    let email = shell_quote(&record.email);

    match record.webroot_path.as_deref() {
        Some(webroot) => format!(
            "sudo certbot certonly --webroot -w {} {} --email {} --agree-tos --no-eff-email --non-interactive",
            shell_quote(webroot),
            domains,
            email
        ),
        None => format!(
            "sudo certbot --{} {} --email {} --agree-tos --no-eff-email --redirect --non-interactive",
            plugin_flag(record.web_server),
            domains,
            email
        ),
    }
}

/// Certificate listing filtered around `domain`
pub fn info_command(domain: &str) -> String {
    format!(
        "sudo certbot certificates | grep -A {} {}",
        INFO_CONTEXT_LINES,
        shell_quote(domain)
    )
}

fn plugin_flag(web_server: WebServer) -> &'static str {
    match web_server {
        WebServer::Nginx => "nginx",
        WebServer::Apache => "apache",
    }
}

/// Single-quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace("'", "'\\''"))
}
