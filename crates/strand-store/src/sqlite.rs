//! Session store backed by SQLite.
//!
//! One row per session, keyed by `(id, context_path, virtual_host)`, with the
//! attribute map stored as a JSON object. Cluster id claims live in their own
//! table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::FromSql;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Value;
use strand_session::{
    BackingStore, ClusterIdRecord, SessionContext, SessionKey, SessionRecord, Timestamps,
};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

const SESSION_COLUMNS: &str = "id, context_path, virtual_host, created, accessed, last_accessed, \
     last_saved, cookie_set_at, expiry_at, max_idle_ms, last_node, attributes";

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Store
// ─────────────────────────────────────────────────────────────────────────────

/// Shared session store backed by a single SQLite database.
///
/// Every node in a cluster opens the same file. WAL mode lets readers proceed
/// while another connection writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Row counts for the two tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions: usize,
    pub cluster_ids: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;

        info!("Session store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store. Nothing is shared with other processes.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize()?;

        debug!("In-memory session store created");
        Ok(store)
    }

    /// Database file, if this store is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Self::create_schema(&conn)
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            -- One row per session per context
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT NOT NULL,
                context_path TEXT NOT NULL,
                virtual_host TEXT NOT NULL,
                created INTEGER NOT NULL,
                accessed INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                last_saved INTEGER NOT NULL,
                cookie_set_at INTEGER NOT NULL DEFAULT 0,
                expiry_at INTEGER NOT NULL,
                max_idle_ms INTEGER NOT NULL,
                last_node TEXT NOT NULL,
                attributes TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (id, context_path, virtual_host)
            );

            -- Expiry sweeps
            CREATE INDEX IF NOT EXISTS idx_sessions_expiry_at
                ON sessions(expiry_at);

            -- Cluster-wide id claims
            CREATE TABLE IF NOT EXISTS cluster_ids (
                cluster_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Rows
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Get a session by key.
    pub fn get_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE id = ?1 AND context_path = ?2 AND virtual_host = ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![key.id(), key.context_path(), key.virtual_host()])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// Every stored session, ordered by key.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY context_path, virtual_host, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    /// Insert a new session row. Fails with [`StoreError::Duplicate`] if the
    /// key is taken.
    pub fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let attributes = serde_json::to_string(record.attributes())?;
        let conn = self.conn.lock();
        let times = record.times();
        let key = record.key();

        let inserted = conn.execute(
            r#"
            INSERT INTO sessions (id, context_path, virtual_host, created, accessed,
                last_accessed, last_saved, cookie_set_at, expiry_at, max_idle_ms,
                last_node, attributes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                key.id(),
                key.context_path(),
                key.virtual_host(),
                times.created,
                times.accessed,
                times.last_accessed,
                times.last_saved,
                times.cookie_set_at,
                times.expiry_at,
                record.max_idle_ms(),
                record.last_node(),
                attributes,
            ],
        );

        match inserted.map_err(StoreError::from) {
            Ok(_) => {
                debug!("Inserted session {}", key);
                Ok(())
            }
            Err(e) if e.is_constraint_violation() => Err(StoreError::Duplicate(key.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Overwrite a session row, inserting it if missing.
    pub fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let attributes = serde_json::to_string(record.attributes())?;
        let conn = self.conn.lock();
        let times = record.times();
        let key = record.key();

        conn.execute(
            r#"
            INSERT INTO sessions (id, context_path, virtual_host, created, accessed,
                last_accessed, last_saved, cookie_set_at, expiry_at, max_idle_ms,
                last_node, attributes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (id, context_path, virtual_host) DO UPDATE SET
                created = excluded.created,
                accessed = excluded.accessed,
                last_accessed = excluded.last_accessed,
                last_saved = excluded.last_saved,
                cookie_set_at = excluded.cookie_set_at,
                expiry_at = excluded.expiry_at,
                max_idle_ms = excluded.max_idle_ms,
                last_node = excluded.last_node,
                attributes = excluded.attributes
            "#,
            params![
                key.id(),
                key.context_path(),
                key.virtual_host(),
                times.created,
                times.accessed,
                times.last_accessed,
                times.last_saved,
                times.cookie_set_at,
                times.expiry_at,
                record.max_idle_ms(),
                record.last_node(),
                attributes,
            ],
        )?;

        debug!("Wrote session {}", key);
        Ok(())
    }

    /// Delete a session row. Returns whether one existed.
    pub fn remove_session(&self, key: &SessionKey) -> Result<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute(
            "DELETE FROM sessions WHERE id = ?1 AND context_path = ?2 AND virtual_host = ?3",
            params![key.id(), key.context_path(), key.virtual_host()],
        )?;
        Ok(rows_affected > 0)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<SessionRecord> {
        let id: String = column(row, 0, UNREADABLE_KEY)?;
        let context_path: String = column(row, 1, &id)?;
        let virtual_host: String = column(row, 2, &id)?;
        let label = format!("{id}:{context_path}:{virtual_host}");

        let times = Timestamps {
            created: column(row, 3, &label)?,
            accessed: column(row, 4, &label)?,
            last_accessed: column(row, 5, &label)?,
            last_saved: column(row, 6, &label)?,
            cookie_set_at: column(row, 7, &label)?,
            expiry_at: column(row, 8, &label)?,
        };
        let max_idle_ms: i64 = column(row, 9, &label)?;
        let last_node: String = column(row, 10, &label)?;
        let attributes_json: String = column(row, 11, &label)?;

        let corrupt = |reason: String| StoreError::Corrupt {
            key: label.clone(),
            reason,
        };

        let key = SessionContext::new(Some(&context_path), Some(&virtual_host))
            .key(&id)
            .map_err(|e| corrupt(e.to_string()))?;
        let attributes: HashMap<String, Value> =
            serde_json::from_str(&attributes_json).map_err(|e| corrupt(e.to_string()))?;

        Ok(SessionRecord::restore(
            key,
            times,
            max_idle_ms,
            last_node,
            attributes,
        ))
    }
}

const UNREADABLE_KEY: &str = "<unreadable>";

fn column<T: FromSql>(row: &rusqlite::Row, idx: usize, key: &str) -> Result<T> {
    row.get(idx).map_err(|e| StoreError::from_column(key, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cluster Id Rows
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    pub fn get_cluster_id(&self, cluster_id: &str) -> Result<Option<ClusterIdRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT cluster_id, created_at FROM cluster_ids WHERE cluster_id = ?1",
                params![cluster_id],
                |row| {
                    Ok(ClusterIdRecord {
                        cluster_id: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Every claimed cluster id, oldest first.
    pub fn list_cluster_ids(&self) -> Result<Vec<ClusterIdRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT cluster_id, created_at FROM cluster_ids ORDER BY created_at, cluster_id")?;
        let records = stmt
            .query_map([], |row| {
                Ok(ClusterIdRecord {
                    cluster_id: row.get(0)?,
                    created_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Record a claim. Fails with [`StoreError::Duplicate`] if the id is
    /// already claimed.
    pub fn insert_cluster_id(&self, record: &ClusterIdRecord) -> Result<()> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO cluster_ids (cluster_id, created_at) VALUES (?1, ?2)",
            params![record.cluster_id, record.created_at],
        );
        match inserted.map_err(StoreError::from) {
            Ok(_) => Ok(()),
            Err(e) if e.is_constraint_violation() => {
                Err(StoreError::Duplicate(record.cluster_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn remove_cluster_id(&self, cluster_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute(
            "DELETE FROM cluster_ids WHERE cluster_id = ?1",
            params![cluster_id],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let sessions: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let cluster_ids: i64 =
            conn.query_row("SELECT COUNT(*) FROM cluster_ids", [], |row| row.get(0))?;
        Ok(StoreStats {
            sessions: sessions as usize,
            cluster_ids: cluster_ids as usize,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BackingStore
// ─────────────────────────────────────────────────────────────────────────────

impl BackingStore for SqliteStore {
    fn read_session(&self, key: &SessionKey) -> strand_session::Result<Option<SessionRecord>> {
        Ok(self.get_session(key)?)
    }

    fn read_all_sessions(&self) -> strand_session::Result<Vec<SessionRecord>> {
        Ok(self.list_sessions()?)
    }

    fn save_session(&self, record: &SessionRecord) -> strand_session::Result<()> {
        Ok(self.insert_session(record)?)
    }

    fn update_session(&self, record: &SessionRecord) -> strand_session::Result<()> {
        Ok(self.upsert_session(record)?)
    }

    fn delete_session(&self, key: &SessionKey) -> strand_session::Result<bool> {
        Ok(self.remove_session(key)?)
    }

    fn read_cluster_id(&self, cluster_id: &str) -> strand_session::Result<Option<ClusterIdRecord>> {
        Ok(self.get_cluster_id(cluster_id)?)
    }

    fn save_cluster_id(&self, record: &ClusterIdRecord) -> strand_session::Result<()> {
        Ok(self.insert_cluster_id(record)?)
    }

    fn delete_cluster_id(&self, cluster_id: &str) -> strand_session::Result<bool> {
        Ok(self.remove_cluster_id(cluster_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, node: &str) -> SessionRecord {
        let key = SessionContext::root().key(id).unwrap();
        SessionRecord::new(key, node, 60_000, 1_000).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = record("s1", "node-a");
        store.insert_session(&record).unwrap();

        let loaded = store.get_session(record.key()).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_get_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = SessionContext::root().key("nope").unwrap();
        assert!(store.get_session(&key).unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = record("s1", "node-a");
        store.insert_session(&record).unwrap();

        let err = store.insert_session(&record).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        let err = store.save_session(&record).unwrap_err();
        assert!(matches!(err, strand_session::Error::Conflict(_)));
    }

    #[test]
    fn test_upsert_overwrites_whole_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_session(&record("s1", "node-a")).unwrap();

        let key = SessionContext::root().key("s1").unwrap();
        let mut attributes = HashMap::new();
        attributes.insert("cart".to_string(), json!(["apple", "pear"]));
        let times = Timestamps {
            created: 1_000,
            accessed: 5_000,
            last_accessed: 1_000,
            last_saved: 5_000,
            cookie_set_at: 5_000,
            expiry_at: 65_000,
        };
        let updated = SessionRecord::restore(key.clone(), times, 60_000, "node-b", attributes);
        store.upsert_session(&updated).unwrap();

        let loaded = store.get_session(&key).unwrap().unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(loaded.last_node(), "node-b");
    }

    #[test]
    fn test_upsert_inserts_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = record("s1", "node-a");
        store.upsert_session(&record).unwrap();
        assert_eq!(store.stats().unwrap().sessions, 1);
    }

    #[test]
    fn test_same_id_in_two_contexts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let shop = SessionContext::new(Some("/shop"), None).key("s1").unwrap();
        let admin = SessionContext::new(Some("/admin"), Some("example.com"))
            .key("s1")
            .unwrap();
        store
            .insert_session(&SessionRecord::new(shop.clone(), "a", 1, 0).unwrap())
            .unwrap();
        store
            .insert_session(&SessionRecord::new(admin.clone(), "a", 1, 0).unwrap())
            .unwrap();

        assert!(store.remove_session(&shop).unwrap());
        assert!(!store.remove_session(&shop).unwrap());
        assert!(store.get_session(&admin).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_attributes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = record("s1", "node-a");
        store.insert_session(&record).unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE sessions SET attributes = 'not json'", [])
            .unwrap();

        let err = store.read_session(record.key()).unwrap_err();
        assert!(matches!(err, strand_session::Error::CorruptRecord { .. }));
    }

    #[test]
    fn test_corrupt_column_type() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = record("s1", "node-a");
        store.insert_session(&record).unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE sessions SET expiry_at = 'garbage'", [])
            .unwrap();

        match store.read_session(record.key()).unwrap_err() {
            strand_session::Error::CorruptRecord { key, reason } => {
                assert_eq!(key, record.key().to_string());
                assert!(reason.contains("expiry_at"), "{reason}");
            }
            other => panic!("expected CorruptRecord, got {other:?}"),
        }
        assert!(matches!(
            store.read_all_sessions().unwrap_err(),
            strand_session::Error::CorruptRecord { .. }
        ));
    }

    #[test]
    fn test_cluster_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        let claim = ClusterIdRecord::new("s1", 42).unwrap();
        store.insert_cluster_id(&claim).unwrap();
        let err = store
            .save_cluster_id(&ClusterIdRecord::new("s1", 99).unwrap())
            .unwrap_err();
        assert!(matches!(err, strand_session::Error::Conflict(_)));

        assert_eq!(store.get_cluster_id("s1").unwrap(), Some(claim));
        assert_eq!(store.list_cluster_ids().unwrap().len(), 1);
        assert!(store.remove_cluster_id("s1").unwrap());
        assert!(store.get_cluster_id("s1").unwrap().is_none());
    }
}
