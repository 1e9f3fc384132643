use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use certsmith_core::CertStatus;
use console::style;
use time::OffsetDateTime;
use time::macros::format_description;

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn brand_accent<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).cyan()
}

pub fn brand_fg<D: Display>(value: D) -> console::StyledObject<D> {
    style(value)
}

pub fn brand_muted<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).dim()
}

pub fn brand_success<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).green()
}

pub fn brand_warning<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).yellow()
}

pub fn brand_error<D: Display>(value: D) -> console::StyledObject<D> {
    style(value).red()
}

pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn section(title: &str) {
    println!();
    println!("{}", brand_accent(title).bold());
}

pub fn step(message: &str) {
    println!("{} {}", brand_accent("•").bold(), brand_fg(message));
}

pub fn success(message: &str) {
    println!("{} {}", brand_success("✓").bold(), brand_fg(message));
}

pub fn warning(message: &str) {
    println!("{} {}", brand_warning("!").bold(), brand_fg(message));
}

pub fn error_stderr(message: &str) {
    eprintln!("{} {}", brand_error("✗").bold(), brand_fg(message));
}

pub fn muted(message: &str) {
    println!("{}", brand_muted(message));
}

/// `label: value` line with a dimmed label
pub fn field(label: &str, value: &str) {
    println!("  {} {}", brand_muted(format!("{:<18}", format!("{}:", label))), value);
}

/// Status word colored by severity
pub fn status_label(status: CertStatus) -> String {
    let text = status.as_str();
    match status {
        CertStatus::Active => brand_success(text).to_string(),
        CertStatus::Expiring | CertStatus::Pending => brand_warning(text).to_string(),
        CertStatus::Expired | CertStatus::Failed => brand_error(text).to_string(),
    }
}

/// `YYYY-MM-DD HH:MM UTC`, or `-` when unknown
pub fn timestamp(value: Option<OffsetDateTime>) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute] UTC");
    value
        .and_then(|t| t.to_offset(time::UtcOffset::UTC).format(&format).ok())
        .unwrap_or_else(|| "-".to_string())
}
