//! Certificate record persistence

mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use certsmith_core::{CertificateId, CertificateRecord, NewCertificate};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare database directory {0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),

    #[error("Invalid stored data for certificate {id}: {reason}")]
    InvalidData { id: CertificateId, reason: String },

    #[error("Certificate {0} not found")]
    NotFound(CertificateId),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD access to certificate records
pub trait CertificateStore: Send + Sync {
    /// Store a validated new record in `pending` state
    fn insert(&self, new: NewCertificate, now: OffsetDateTime) -> StoreResult<CertificateRecord>;

    fn get(&self, id: CertificateId) -> StoreResult<Option<CertificateRecord>>;

    /// All records, newest first
    fn list(&self) -> StoreResult<Vec<CertificateRecord>>;

    /// Overwrite an existing record
    fn update(&self, record: &CertificateRecord) -> StoreResult<()>;

    /// Returns false if the record did not exist
    fn delete(&self, id: CertificateId) -> StoreResult<bool>;

    /// Records the renewal sweep should attempt
    fn renewal_candidates(
        &self,
        now: OffsetDateTime,
        lookahead: Duration,
    ) -> StoreResult<Vec<CertificateRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.is_due_for_renewal(now, lookahead))
            .collect())
    }
}
