//! Record-level coordination between the store and the provisioner
//!
//! At most one install/renew runs per record at a time. Each operation holds
//! the record's lock from reload to persist, so concurrent writers cannot lose
//! each other's status or error updates.

use certsmith_core::{
    CertStatus, CertificateId, CertificateRecord, NewCertificate, RecordError,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::provision::{ProvisionOutcome, Provisioner};
use crate::store::{CertificateStore, StoreError};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Certificate {0} not found")]
    NotFound(CertificateId),

    #[error(transparent)]
    Invalid(#[from] RecordError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// Record counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub expiring: usize,
    pub expired: usize,
    pub failed: usize,
    pub auto_renew: usize,
}

impl CertStats {
    fn count(&mut self, status: CertStatus) {
        self.total += 1;
        match status {
            CertStatus::Pending => self.pending += 1,
            CertStatus::Active => self.active += 1,
            CertStatus::Expiring => self.expiring += 1,
            CertStatus::Expired => self.expired += 1,
            CertStatus::Failed => self.failed += 1,
        }
    }
}

pub struct CertificateManager {
    store: Arc<dyn CertificateStore>,
    provisioner: Arc<Provisioner>,
    record_locks: RwLock<HashMap<CertificateId, Arc<Mutex<()>>>>,
}

impl CertificateManager {
    pub fn new(store: Arc<dyn CertificateStore>, provisioner: Arc<Provisioner>) -> Self {
        Self {
            store,
            provisioner,
            record_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    /// Get or create the lock serializing operations on one record
    fn record_lock(&self, id: CertificateId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.record_locks.read().get(&id) {
            return lock.clone();
        }

        self.record_locks
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate and store a new record in `pending` state
    pub fn create(&self, new: NewCertificate) -> ManagerResult<CertificateRecord> {
        let new = new.validated()?;
        let record = self.store.insert(new, OffsetDateTime::now_utc())?;
        tracing::info!(id = record.id, domain = %record.domain, "Certificate record created");
        Ok(record)
    }

    /// Load a record with its status re-derived for the current time
    pub fn get(&self, id: CertificateId) -> ManagerResult<CertificateRecord> {
        let record = self.load(id)?;
        Ok(self.refresh_on_read(record, OffsetDateTime::now_utc()))
    }

    /// All records, newest first, with statuses re-derived
    pub fn list(&self) -> ManagerResult<Vec<CertificateRecord>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|record| self.refresh_on_read(record, now))
            .collect())
    }

    pub fn stats(&self) -> ManagerResult<CertStats> {
        let mut stats = CertStats::default();
        for record in self.list()? {
            stats.count(record.status);
            if record.auto_renew {
                stats.auto_renew += 1;
            }
        }
        Ok(stats)
    }

    /// Issue and install the record's certificate
    pub async fn install(
        &self,
        id: CertificateId,
        cancel: &CancellationToken,
    ) -> ManagerResult<ProvisionOutcome> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let record = self.load(id)?;
        let outcome = self.provisioner.install(record, cancel).await;
        self.persist(&outcome.record)?;
        Ok(outcome)
    }

    /// Renew the record's certificate
    pub async fn renew(
        &self,
        id: CertificateId,
        cancel: &CancellationToken,
    ) -> ManagerResult<ProvisionOutcome> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let record = self.load(id)?;
        let outcome = self.provisioner.renew(record, cancel).await;
        self.persist(&outcome.record)?;
        Ok(outcome)
    }

    /// Flip auto-renew. Nothing else about the record changes.
    pub async fn toggle_auto_renew(&self, id: CertificateId) -> ManagerResult<CertificateRecord> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let mut record = self.load(id)?;
        let enabled = record.toggle_auto_renew();
        self.persist(&record)?;
        tracing::info!(id, auto_renew = enabled, "Auto-renew toggled");
        Ok(record)
    }

    /// Delete a record. Waits for any in-flight operation on it.
    pub async fn delete(&self, id: CertificateId) -> ManagerResult<bool> {
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;

        let existed = self.store.delete(id)?;
        self.record_locks.write().remove(&id);
        if existed {
            tracing::info!(id, "Certificate record deleted");
        }
        Ok(existed)
    }

    fn load(&self, id: CertificateId) -> ManagerResult<CertificateRecord> {
        self.store.get(id)?.ok_or(ManagerError::NotFound(id))
    }

    fn persist(&self, record: &CertificateRecord) -> ManagerResult<()> {
        let mut record = record.clone();
        record.updated_at = OffsetDateTime::now_utc();
        self.store.update(&record)?;
        Ok(())
    }

    /// Apply the status transition to a freshly read record.
    ///
    /// Persists only when the status changed and no operation holds the
    /// record; an in-flight install/renew writes its own result.
    fn refresh_on_read(&self, mut record: CertificateRecord, now: OffsetDateTime) -> CertificateRecord {
        let next = record.current_status(now);
        if next == record.status {
            return record;
        }

        let lock = self.record_lock(record.id);
        if let Ok(_guard) = lock.try_lock() {
            match self.store.get(record.id) {
                Ok(Some(mut current)) => {
                    if current.refresh_status(now) {
                        current.updated_at = now;
                        if let Err(e) = self.store.update(&current) {
                            tracing::warn!(id = record.id, error = %e, "Failed to persist status change");
                        } else {
                            tracing::debug!(id = record.id, status = %current.status, "Status updated on read");
                        }
                    }
                    return current;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(id = record.id, error = %e, "Failed to reload record");
                }
            }
        }

        record.status = next;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PlainCredentialProvider;
    use crate::ssh::fake::FakeConnector;
    use crate::store::MemoryStore;
    use crate::store::test_support::new_cert;
    use std::time::Duration;
    use time::macros::datetime;

    const LISTING: &str = "\
    Expiry Date: 2099-03-01 12:30:00+00:00 (VALID: 89 days)
    Certificate Path: /etc/letsencrypt/live/example.com/fullchain.pem
    Private Key Path: /etc/letsencrypt/live/example.com/privkey.pem
";

    fn manager(fake: &FakeConnector) -> CertificateManager {
        let provisioner = Provisioner::new(Arc::new(fake.clone()), Arc::new(PlainCredentialProvider));
        CertificateManager::new(Arc::new(MemoryStore::new()), Arc::new(provisioner))
    }

    fn healthy_host() -> FakeConnector {
        let fake = FakeConnector::new();
        fake.respond("which certbot", 0, "/usr/bin/certbot")
            .respond("sudo certbot certificates", 0, LISTING);
        fake
    }

    #[test]
    fn create_rejects_invalid_input() {
        let manager = manager(&FakeConnector::new());
        let mut new = new_cert("example.com", "203.0.113.10");
        new.email = "not-an-email".to_string();
        assert!(matches!(
            manager.create(new),
            Err(ManagerError::Invalid(RecordError::InvalidEmail(_)))
        ));
    }

    #[test]
    fn get_rederives_and_persists_expired_status() {
        let manager = manager(&FakeConnector::new());
        let mut record = manager.create(new_cert("example.com", "203.0.113.10")).unwrap();
        record.status = CertStatus::Active;
        record.expires_at = Some(datetime!(2001-01-01 0:00 UTC));
        manager.store().update(&record).unwrap();

        let read = manager.get(record.id).unwrap();
        assert_eq!(read.status, CertStatus::Expired);
        let stored = manager.store().get(record.id).unwrap().unwrap();
        assert_eq!(stored.status, CertStatus::Expired);
    }

    #[test]
    fn stats_count_each_status() {
        let manager = manager(&FakeConnector::new());
        manager.create(new_cert("a.example.com", "203.0.113.1")).unwrap();
        let mut b = manager.create(new_cert("b.example.com", "203.0.113.2")).unwrap();
        b.status = CertStatus::Failed;
        b.auto_renew = false;
        manager.store().update(&b).unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.auto_renew, 1);
    }

    #[tokio::test]
    async fn install_persists_outcome() {
        let fake = healthy_host();
        let manager = manager(&fake);
        let record = manager.create(new_cert("example.com", "203.0.113.10")).unwrap();

        let outcome = manager
            .install(record.id, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);

        let stored = manager.store().get(record.id).unwrap().unwrap();
        assert_eq!(stored.status, CertStatus::Active);
        assert_eq!(
            stored.certificate_path.as_deref(),
            Some("/etc/letsencrypt/live/example.com/fullchain.pem")
        );
    }

    #[tokio::test]
    async fn failed_renew_persists_message_but_not_status() {
        let fake = FakeConnector::new();
        fake.respond("certbot renew", 1, "rate limited");
        let manager = manager(&fake);
        let mut record = manager.create(new_cert("example.com", "203.0.113.10")).unwrap();
        record.status = CertStatus::Active;
        record.expires_at = Some(datetime!(2099-01-01 0:00 UTC));
        manager.store().update(&record).unwrap();

        let outcome = manager
            .renew(record.id, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.success);

        let stored = manager.store().get(record.id).unwrap().unwrap();
        assert_eq!(stored.status, CertStatus::Active);
        assert!(stored.error_message.unwrap().contains("Certificate renewal failed"));
    }

    #[tokio::test]
    async fn toggle_leaves_lifecycle_fields_alone() {
        let manager = manager(&FakeConnector::new());
        let record = manager.create(new_cert("example.com", "203.0.113.10")).unwrap();

        let toggled = manager.toggle_auto_renew(record.id).await.unwrap();
        assert!(!toggled.auto_renew);
        assert_eq!(toggled.status, record.status);
        assert_eq!(toggled.expires_at, record.expires_at);

        let stored = manager.store().get(record.id).unwrap().unwrap();
        assert!(!stored.auto_renew);
    }

    #[tokio::test]
    async fn deleted_record_cannot_be_installed() {
        let fake = healthy_host();
        let manager = manager(&fake);
        let record = manager.create(new_cert("example.com", "203.0.113.10")).unwrap();

        assert!(manager.delete(record.id).await.unwrap());
        assert!(!manager.delete(record.id).await.unwrap());
        assert!(matches!(
            manager.install(record.id, &CancellationToken::new()).await,
            Err(ManagerError::NotFound(_))
        ));
        assert_eq!(fake.connects(), 0);
    }

    #[tokio::test]
    async fn operations_on_one_record_are_serialized() {
        let fake = healthy_host();
        fake.with_delay(Duration::from_millis(20));
        let manager = Arc::new(manager(&fake));
        let record = manager.create(new_cert("example.com", "203.0.113.10")).unwrap();

        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(
            manager.install(record.id, &cancel),
            manager.renew(record.id, &cancel)
        );
        assert!(a.unwrap().success);
        assert!(b.unwrap().success);
        assert_eq!(fake.connects(), 2);
        assert_eq!(fake.max_active(), 1);
    }
}
