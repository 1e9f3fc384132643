use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{ConfigError, Result};

/// Settings from `$CERTSMITH_HOME/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub ssh: SshSettings,
    pub renewal: RenewalSettings,
    pub storage: StorageSettings,
    pub secrets: SecretsSettings,
}

/// `[ssh]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SshSettings {
    /// Bound on connect + authenticate
    pub connect_timeout_secs: u64,
    /// Bound on each remote command
    pub command_timeout_secs: u64,
    /// Port used when a record is added without one
    pub default_port: u16,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            command_timeout_secs: 900,
            default_port: 22,
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Upper bound for `renewal.lookahead_days`
pub const MAX_LOOKAHEAD_DAYS: i64 = 365;

/// Upper bound for `renewal.interval_hours` (one year)
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365;

/// `[renewal]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RenewalSettings {
    /// Hours between sweeps
    pub interval_hours: u64,
    /// Renew certificates expiring within this many days
    pub lookahead_days: i64,
    /// Renewals run in parallel per sweep
    pub concurrency: usize,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            interval_hours: 12,
            lookahead_days: certsmith_core::RENEWAL_WINDOW_DAYS,
            concurrency: 4,
        }
    }
}

impl RenewalSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(60 * 60))
    }

    pub fn lookahead(&self) -> time::Duration {
        time::Duration::days(self.lookahead_days)
    }
}

/// `[storage]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// SQLite database file; relative paths resolve against the home directory
    pub database: Option<PathBuf>,
}

/// `[secrets]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsSettings {
    /// Credential encryption key file; relative paths resolve against the home directory
    pub key_file: Option<PathBuf>,
}

impl Settings {
    /// Get the default path (`$CERTSMITH_HOME/config.toml`).
    pub fn default_path() -> Result<PathBuf> {
        Ok(home_dir()?.join("config.toml"))
    }

    /// Load settings from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            return Self::load_from_file(&path);
        }
        Ok(Self::default())
    }

    /// Load settings from a specific file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(path.as_ref().to_path_buf(), e))?;
        Self::parse(&content)
    }

    /// Parse and validate settings TOML.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ssh.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "ssh.connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.ssh.command_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "ssh.command_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.ssh.default_port == 0 {
            return Err(ConfigError::Validation(
                "ssh.default_port cannot be 0".to_string(),
            ));
        }
        if self.renewal.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "renewal.interval_hours must be at least 1".to_string(),
            ));
        }
        if self.renewal.interval_hours > MAX_INTERVAL_HOURS {
            return Err(ConfigError::Validation(format!(
                "renewal.interval_hours cannot exceed {}",
                MAX_INTERVAL_HOURS
            )));
        }
        if !(1..=MAX_LOOKAHEAD_DAYS).contains(&self.renewal.lookahead_days) {
            return Err(ConfigError::Validation(format!(
                "renewal.lookahead_days must be between 1 and {}",
                MAX_LOOKAHEAD_DAYS
            )));
        }
        if self.renewal.concurrency == 0 {
            return Err(ConfigError::Validation(
                "renewal.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Database file, resolved against `home`
    pub fn database_path(&self, home: &Path) -> PathBuf {
        resolve(home, self.storage.database.as_deref(), "certsmith.sqlite3")
    }

    /// Encryption key file, resolved against `home`
    pub fn key_file_path(&self, home: &Path) -> PathBuf {
        resolve(
            home,
            self.secrets.key_file.as_deref(),
            "keys/credentials",
        )
    }
}

fn home_dir() -> Result<PathBuf> {
    crate::paths::certsmith_home_dir().map_err(|e| {
        ConfigError::Validation(format!("Could not determine certsmith home directory: {}", e))
    })
}

fn resolve(home: &Path, configured: Option<&Path>, default: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => home.join(path),
        None => home.join(default),
    }
}
