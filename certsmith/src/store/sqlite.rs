use certsmith_core::{
    AuthKind, CertStatus, CertificateId, CertificateRecord, NewCertificate, SealedCredential,
    WebServer,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{CertificateStore, StoreError, StoreResult};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS certificates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    domains TEXT NOT NULL,
    email TEXT NOT NULL,
    server_ip TEXT NOT NULL,
    server_hostname TEXT,
    ssh_port INTEGER NOT NULL DEFAULT 22,
    ssh_username TEXT NOT NULL,
    ssh_auth_type TEXT NOT NULL,
    ssh_password TEXT,
    ssh_key TEXT,
    web_server_type TEXT NOT NULL,
    webroot_path TEXT,
    auto_renew INTEGER NOT NULL DEFAULT 1,
    expires_at TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    certificate_path TEXT,
    private_key_path TEXT,
    full_chain_path TEXT,
    error_message TEXT,
    last_renewed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS certificates_renewal_idx
    ON certificates (auto_renew, status, expires_at);
";

const COLUMNS: &str = "id, domain, domains, email, server_ip, server_hostname, ssh_port, \
     ssh_username, ssh_auth_type, ssh_password, ssh_key, web_server_type, webroot_path, \
     auto_renew, expires_at, status, certificate_path, private_key_path, full_chain_path, \
     error_message, last_renewed_at, created_at, updated_at";

/// SQLite-backed [`CertificateStore`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Private in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tracing::debug!(from = version, to = SCHEMA_VERSION, "Migrated certificate store");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, sql: &str, id: Option<CertificateId>) -> StoreResult<Vec<CertificateRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = match id {
            Some(id) => stmt
                .query_map(params![id], RawRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], RawRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().map(RawRow::into_record).collect()
    }
}

impl CertificateStore for SqliteStore {
    fn insert(&self, new: NewCertificate, now: OffsetDateTime) -> StoreResult<CertificateRecord> {
        let mut record = CertificateRecord::from_new(0, new, now);
        let domains = encode_domains(&record)?;
        let created = format_time(record.id, now)?;
        let (password, key) = record.credential.to_columns();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO certificates (domain, domains, email, server_ip, server_hostname, \
             ssh_port, ssh_username, ssh_auth_type, ssh_password, ssh_key, web_server_type, \
             webroot_path, auto_renew, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                record.domain,
                domains,
                record.email,
                record.server_ip,
                record.server_hostname,
                record.ssh_port,
                record.ssh_username,
                record.ssh_auth_type.as_str(),
                password,
                key,
                record.web_server.as_str(),
                record.webroot_path,
                record.auto_renew,
                record.status.as_str(),
                created,
            ],
        )?;
        record.id = conn.last_insert_rowid();
        Ok(record)
    }

    fn get(&self, id: CertificateId) -> StoreResult<Option<CertificateRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM certificates WHERE id = ?1");
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(&sql, params![id], RawRow::from_row)
                .optional()?
        };
        raw.map(RawRow::into_record).transpose()
    }

    fn list(&self) -> StoreResult<Vec<CertificateRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM certificates ORDER BY created_at DESC, id DESC");
        self.query(&sql, None)
    }

    fn update(&self, record: &CertificateRecord) -> StoreResult<()> {
        let id = record.id;
        let domains = encode_domains(record)?;
        let (password, key) = record.credential.to_columns();
        let expires_at = record.expires_at.map(|t| format_time(id, t)).transpose()?;
        let last_renewed_at = record
            .last_renewed_at
            .map(|t| format_time(id, t))
            .transpose()?;
        let updated_at = format_time(id, record.updated_at)?;

        let changed = self.conn.lock().execute(
            "UPDATE certificates SET domain = ?2, domains = ?3, email = ?4, server_ip = ?5, \
             server_hostname = ?6, ssh_port = ?7, ssh_username = ?8, ssh_auth_type = ?9, \
             ssh_password = ?10, ssh_key = ?11, web_server_type = ?12, webroot_path = ?13, \
             auto_renew = ?14, expires_at = ?15, status = ?16, certificate_path = ?17, \
             private_key_path = ?18, full_chain_path = ?19, error_message = ?20, \
             last_renewed_at = ?21, updated_at = ?22 WHERE id = ?1",
            params![
                id,
                record.domain,
                domains,
                record.email,
                record.server_ip,
                record.server_hostname,
                record.ssh_port,
                record.ssh_username,
                record.ssh_auth_type.as_str(),
                password,
                key,
                record.web_server.as_str(),
                record.webroot_path,
                record.auto_renew,
                expires_at,
                record.status.as_str(),
                record.certificate_path,
                record.private_key_path,
                record.full_chain_path,
                record.error_message,
                last_renewed_at,
                updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn delete(&self, id: CertificateId) -> StoreResult<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM certificates WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn renewal_candidates(
        &self,
        now: OffsetDateTime,
        lookahead: time::Duration,
    ) -> StoreResult<Vec<CertificateRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM certificates \
             WHERE auto_renew = 1 AND status != 'failed' AND expires_at IS NOT NULL \
             ORDER BY id"
        );
        Ok(self
            .query(&sql, None)?
            .into_iter()
            .filter(|r| r.is_due_for_renewal(now, lookahead))
            .collect())
    }
}

/// Row as stored, before domain conversion
struct RawRow {
    id: CertificateId,
    domain: String,
    domains: String,
    email: String,
    server_ip: String,
    server_hostname: Option<String>,
    ssh_port: u16,
    ssh_username: String,
    ssh_auth_type: String,
    ssh_password: Option<String>,
    ssh_key: Option<String>,
    web_server_type: String,
    webroot_path: Option<String>,
    auto_renew: bool,
    expires_at: Option<String>,
    status: String,
    certificate_path: Option<String>,
    private_key_path: Option<String>,
    full_chain_path: Option<String>,
    error_message: Option<String>,
    last_renewed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            domain: row.get(1)?,
            domains: row.get(2)?,
            email: row.get(3)?,
            server_ip: row.get(4)?,
            server_hostname: row.get(5)?,
            ssh_port: row.get(6)?,
            ssh_username: row.get(7)?,
            ssh_auth_type: row.get(8)?,
            ssh_password: row.get(9)?,
            ssh_key: row.get(10)?,
            web_server_type: row.get(11)?,
            webroot_path: row.get(12)?,
            auto_renew: row.get(13)?,
            expires_at: row.get(14)?,
            status: row.get(15)?,
            certificate_path: row.get(16)?,
            private_key_path: row.get(17)?,
            full_chain_path: row.get(18)?,
            error_message: row.get(19)?,
            last_renewed_at: row.get(20)?,
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }

    fn into_record(self) -> StoreResult<CertificateRecord> {
        let id = self.id;
        let invalid = |reason: String| StoreError::InvalidData { id, reason };

        let ssh_auth_type: AuthKind = self
            .ssh_auth_type
            .parse()
            .map_err(|e: certsmith_core::RecordError| invalid(e.to_string()))?;
        let credential =
            SealedCredential::from_columns(ssh_auth_type, self.ssh_password, self.ssh_key)
                .map_err(|e| invalid(e.to_string()))?;
        let web_server: WebServer = self
            .web_server_type
            .parse()
            .map_err(|e: certsmith_core::RecordError| invalid(e.to_string()))?;
        let status: CertStatus = self.status.parse().map_err(invalid)?;
        let domains: Vec<String> = serde_json::from_str(&self.domains)
            .map_err(|e| invalid(format!("domains: {}", e)))?;

        Ok(CertificateRecord {
            id,
            domain: self.domain,
            domains,
            email: self.email,
            server_ip: self.server_ip,
            server_hostname: self.server_hostname,
            ssh_port: self.ssh_port,
            ssh_username: self.ssh_username,
            credential,
            ssh_auth_type,
            web_server,
            webroot_path: self.webroot_path,
            auto_renew: self.auto_renew,
            status,
            expires_at: parse_time(id, self.expires_at.as_deref())?,
            certificate_path: self.certificate_path,
            private_key_path: self.private_key_path,
            full_chain_path: self.full_chain_path,
            error_message: self.error_message,
            last_renewed_at: parse_time(id, self.last_renewed_at.as_deref())?,
            created_at: parse_required_time(id, &self.created_at)?,
            updated_at: parse_required_time(id, &self.updated_at)?,
        })
    }
}

fn encode_domains(record: &CertificateRecord) -> StoreResult<String> {
    serde_json::to_string(&record.domains).map_err(|e| StoreError::InvalidData {
        id: record.id,
        reason: format!("domains: {}", e),
    })
}

fn format_time(id: CertificateId, t: OffsetDateTime) -> StoreResult<String> {
    t.format(&Rfc3339).map_err(|e| StoreError::InvalidData {
        id,
        reason: format!("timestamp: {}", e),
    })
}

fn parse_required_time(id: CertificateId, raw: &str) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| StoreError::InvalidData {
        id,
        reason: format!("timestamp '{}': {}", raw, e),
    })
}

fn parse_time(id: CertificateId, raw: Option<&str>) -> StoreResult<Option<OffsetDateTime>> {
    raw.map(|r| parse_required_time(id, r)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::new_cert;
    use tempfile::TempDir;
    use time::Duration;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);

    #[test]
    fn insert_then_get_preserves_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let inserted = store.insert(new_cert("example.com", "203.0.113.10"), NOW).unwrap();
        assert!(inserted.id > 0);

        let loaded = store.get(inserted.id).unwrap().unwrap();
        assert_eq!(loaded.domain, "example.com");
        assert_eq!(loaded.domains, vec!["example.com", "www.example.com"]);
        assert_eq!(loaded.status, CertStatus::Pending);
        assert_eq!(loaded.credential, inserted.credential);
        assert_eq!(loaded.created_at, NOW);
        assert!(loaded.expires_at.is_none());
    }

    #[test]
    fn update_round_trips_lifecycle_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = store.insert(new_cert("example.com", "203.0.113.10"), NOW).unwrap();
        record.status = CertStatus::Active;
        record.expires_at = Some(NOW + Duration::days(90));
        record.certificate_path = Some("/etc/letsencrypt/live/example.com/fullchain.pem".into());
        record.error_message = Some("boom".into());
        record.last_renewed_at = Some(NOW);
        record.updated_at = NOW + Duration::minutes(5);
        store.update(&record).unwrap();

        let loaded = store.get(record.id).unwrap().unwrap();
        assert_eq!(loaded.status, CertStatus::Active);
        assert_eq!(loaded.expires_at, record.expires_at);
        assert_eq!(loaded.certificate_path, record.certificate_path);
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));
        assert_eq!(loaded.last_renewed_at, Some(NOW));
        assert_eq!(loaded.updated_at, NOW + Duration::minutes(5));
    }

    #[test]
    fn list_is_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.insert(new_cert("a.example.com", "203.0.113.1"), NOW).unwrap();
        let b = store
            .insert(new_cert("b.example.com", "203.0.113.2"), NOW + Duration::hours(1))
            .unwrap();
        let ids: Vec<_> = store.list().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn delete_is_terminal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = store.insert(new_cert("example.com", "203.0.113.10"), NOW).unwrap();
        assert!(store.delete(record.id).unwrap());
        assert!(!store.delete(record.id).unwrap());
        assert!(store.get(record.id).unwrap().is_none());
        assert!(matches!(
            store.update(&record),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn renewal_candidates_filter_due_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let lookahead = Duration::days(30);

        let mut due = store.insert(new_cert("due.example.com", "203.0.113.1"), NOW).unwrap();
        due.status = CertStatus::Expiring;
        due.expires_at = Some(NOW + Duration::days(10));
        store.update(&due).unwrap();

        let mut far = store.insert(new_cert("far.example.com", "203.0.113.2"), NOW).unwrap();
        far.status = CertStatus::Active;
        far.expires_at = Some(NOW + Duration::days(80));
        store.update(&far).unwrap();

        let mut failed = store.insert(new_cert("failed.example.com", "203.0.113.3"), NOW).unwrap();
        failed.status = CertStatus::Failed;
        failed.expires_at = Some(NOW + Duration::days(5));
        store.update(&failed).unwrap();

        let mut manual = store.insert(new_cert("manual.example.com", "203.0.113.4"), NOW).unwrap();
        manual.auto_renew = false;
        manual.expires_at = Some(NOW - Duration::days(1));
        store.update(&manual).unwrap();

        store.insert(new_cert("pending.example.com", "203.0.113.5"), NOW).unwrap();

        let ids: Vec<_> = store
            .renewal_candidates(NOW, lookahead)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![due.id]);
    }

    #[test]
    fn inconsistent_credential_columns_are_invalid_data() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = store.insert(new_cert("example.com", "203.0.113.10"), NOW).unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE certificates SET ssh_key = 'also-set' WHERE id = ?1",
                params![record.id],
            )
            .unwrap();
        assert!(matches!(
            store.get(record.id),
            Err(StoreError::InvalidData { .. })
        ));
    }

    #[test]
    fn reopening_file_database_keeps_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("certsmith.sqlite3");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(new_cert("example.com", "203.0.113.10"), NOW).unwrap().id
        };
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get(id).unwrap().is_some());
    }
}
