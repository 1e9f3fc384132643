//! Certificate status state machine
//!
//! The transition function is pure: given the stored status, the known expiry
//! and the current time it returns the status a record should carry. It is
//! applied after install/renew and again whenever a record is read, so a
//! certificate moves to `expired` purely through the passage of time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

/// Certificates expiring within this many days are reported as `expiring`.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// Lifecycle status of a managed certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertStatus {
    /// Created, nothing issued yet
    Pending,
    /// Issued and comfortably valid
    Active,
    /// Valid, but inside the renewal window
    Expiring,
    /// Past its expiry date
    Expired,
    /// Last install attempt failed
    Failed,
}

impl CertStatus {
    pub const ALL: [CertStatus; 5] = [
        CertStatus::Pending,
        CertStatus::Active,
        CertStatus::Expiring,
        CertStatus::Expired,
        CertStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CertStatus::Pending => "pending",
            CertStatus::Active => "active",
            CertStatus::Expiring => "expiring",
            CertStatus::Expired => "expired",
            CertStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(CertStatus::Pending),
            "active" => Ok(CertStatus::Active),
            "expiring" => Ok(CertStatus::Expiring),
            "expired" => Ok(CertStatus::Expired),
            "failed" => Ok(CertStatus::Failed),
            other => Err(format!("Unknown certificate status '{}'", other)),
        }
    }
}

/// Length of the renewal window as a duration
pub fn renewal_window() -> Duration {
    Duration::days(RENEWAL_WINDOW_DAYS)
}

/// Expiry at or before `now`
pub fn is_expired(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    expires_at <= now
}

/// Expiry in `(now, now + 30 days]`
pub fn is_expiring(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    expires_at > now && expires_at <= now + renewal_window()
}

/// Compute the next status for a record.
///
/// - known expiry in the past: `expired`
/// - known expiry within the renewal window (inclusive): `expiring`
/// - `pending` with a known expiry: `active`
/// - anything else keeps its current status
pub fn next_status(
    current: CertStatus,
    expires_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> CertStatus {
    match expires_at {
        Some(exp) if is_expired(exp, now) => CertStatus::Expired,
        Some(exp) if is_expiring(exp, now) => CertStatus::Expiring,
        Some(_) if current == CertStatus::Pending => CertStatus::Active,
        _ => current,
    }
}

/// Whole days until expiry (negative once expired)
pub fn days_until_expiry(expires_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (expires_at - now).whole_days()
}
