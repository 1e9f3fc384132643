//! Parsing of `certbot certificates` output
//!
//! Extraction is line-prefix based and never fails: text that matches none of
//! the known prefixes yields an empty [`CertInfo`]. Whether an operation
//! succeeded is decided by exit status alone, not by what was parsed here.

use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

const EXPIRY_PREFIX: &str = "Expiry Date:";
const CERTIFICATE_PATH_PREFIX: &str = "Certificate Path:";
const PRIVATE_KEY_PATH_PREFIX: &str = "Private Key Path:";

/// Fields extracted from the certificate listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertInfo {
    pub expires_at: Option<OffsetDateTime>,
    pub certificate_path: Option<String>,
    pub private_key_path: Option<String>,
    /// Non-fatal problems noticed while parsing
    pub warnings: Vec<ParseWarning>,
}

/// A recognised field of the listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertField {
    ExpiryDate,
    CertificatePath,
    PrivateKeyPath,
}

impl CertField {
    pub fn label(&self) -> &'static str {
        match self {
            CertField::ExpiryDate => "expiry date",
            CertField::CertificatePath => "certificate path",
            CertField::PrivateKeyPath => "private key path",
        }
    }
}

/// Non-fatal parse problem; the affected field is simply left absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    Missing(CertField),
    InvalidExpiry(String),
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::Missing(field) => write!(f, "{} not found in output", field.label()),
            ParseWarning::InvalidExpiry(raw) => write!(f, "unrecognised expiry date '{}'", raw),
        }
    }
}

impl CertInfo {
    /// True when nothing at all was extracted
    pub fn is_empty(&self) -> bool {
        self.expires_at.is_none()
            && self.certificate_path.is_none()
            && self.private_key_path.is_none()
    }
}

/// Extract expiry and artifact paths from raw tool output.
///
/// The first occurrence of each prefix wins.
pub fn parse_cert_info(output: &str) -> CertInfo {
    let mut expiry_raw: Option<&str> = None;
    let mut certificate_path: Option<String> = None;
    let mut private_key_path: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();
        if expiry_raw.is_none()
            && let Some(rest) = line.strip_prefix(EXPIRY_PREFIX)
        {
            expiry_raw = non_empty(rest);
        } else if certificate_path.is_none()
            && let Some(rest) = line.strip_prefix(CERTIFICATE_PATH_PREFIX)
        {
            certificate_path = non_empty(rest).map(str::to_string);
        } else if private_key_path.is_none()
            && let Some(rest) = line.strip_prefix(PRIVATE_KEY_PATH_PREFIX)
        {
            private_key_path = non_empty(rest).map(str::to_string);
        }
    }

    let mut warnings = Vec::new();
    let expires_at = match expiry_raw {
        Some(raw) => {
            let parsed = parse_expiry(raw);
            if parsed.is_none() {
                warnings.push(ParseWarning::InvalidExpiry(raw.to_string()));
            }
            parsed
        }
        None => {
            warnings.push(ParseWarning::Missing(CertField::ExpiryDate));
            None
        }
    };
    if certificate_path.is_none() {
        warnings.push(ParseWarning::Missing(CertField::CertificatePath));
    }
    if private_key_path.is_none() {
        warnings.push(ParseWarning::Missing(CertField::PrivateKeyPath));
    }

    CertInfo {
        expires_at,
        certificate_path,
        private_key_path,
        warnings,
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Parse an expiry value such as `2025-03-01 12:30:00+00:00 (VALID: 89 days)`.
///
/// Also accepts RFC 3339 and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_expiry(raw: &str) -> Option<OffsetDateTime> {
    // certbot appends "(VALID: N days)" or "(INVALID: EXPIRED)"
    let value = raw.split(" (").next().unwrap_or(raw).trim();

    let certbot = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    );
    if let Ok(dt) = OffsetDateTime::parse(value, &certbot) {
        return Some(dt.to_offset(UtcOffset::UTC));
    }

    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(dt.to_offset(UtcOffset::UTC));
    }

    let naive = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(value, &naive) {
        return Some(dt.assume_utc());
    }

    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(value, &date_only)
        .ok()
        .map(|d| d.midnight().assume_utc())
}
