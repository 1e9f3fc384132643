use certsmith_core::{CertificateId, CertificateRecord, NewCertificate};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use super::{CertificateStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    next_id: CertificateId,
    records: BTreeMap<CertificateId, CertificateRecord>,
}

/// In-process [`CertificateStore`]; contents are lost on drop
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStore for MemoryStore {
    fn insert(&self, new: NewCertificate, now: OffsetDateTime) -> StoreResult<CertificateRecord> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let record = CertificateRecord::from_new(inner.next_id, new, now);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: CertificateId) -> StoreResult<Option<CertificateRecord>> {
        Ok(self.inner.read().records.get(&id).cloned())
    }

    fn list(&self) -> StoreResult<Vec<CertificateRecord>> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    fn update(&self, record: &CertificateRecord) -> StoreResult<()> {
        let mut inner = self.inner.write();
        match inner.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    fn delete(&self, id: CertificateId) -> StoreResult<bool> {
        Ok(self.inner.write().records.remove(&id).is_some())
    }
}
