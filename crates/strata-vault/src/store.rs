//! Persistent record stores for wrapped keys

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use strata_core::{StrataError, StrataResult};

/// One wrapped key as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    pub id: String,
    /// Unix seconds
    pub created_at: i64,
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    pub wrapped_key: Vec<u8>,
    pub mode: String,
}

/// Record metadata without key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySummary {
    pub id: String,
    pub created_at: i64,
    pub mode: String,
}

impl From<&VaultRecord> for KeySummary {
    fn from(r: &VaultRecord) -> Self {
        Self {
            id: r.id.clone(),
            created_at: r.created_at,
            mode: r.mode.clone(),
        }
    }
}

/// Backend for [`crate::KeyVault`]. Implementations serialize writers;
/// `upsert` replaces any record with the same id.
pub trait VaultStore: Send + Sync {
    fn upsert(&self, record: &VaultRecord) -> StrataResult<()>;
    fn fetch(&self, id: &str) -> StrataResult<Option<VaultRecord>>;
    /// All records ordered by id.
    fn list(&self) -> StrataResult<Vec<KeySummary>>;
}

/// SQLite-backed store: one `keys` table, one connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> StrataResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StrataError::io_at(parent, e))?;
        }
        let conn = Connection::open(path).map_err(sql)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(sql)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql)?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> StrataResult<Self> {
        Self::init(Connection::open_in_memory().map_err(sql)?)
    }

    fn init(conn: Connection) -> StrataResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keys (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                salt BLOB NOT NULL,
                iv BLOB NOT NULL,
                wrapped_key BLOB NOT NULL,
                mode TEXT NOT NULL
            );",
        )
        .map_err(sql)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StrataResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StrataError::Storage("vault connection lock poisoned".into()))
    }
}

impl VaultStore for SqliteStore {
    fn upsert(&self, record: &VaultRecord) -> StrataResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO keys (id, created_at, salt, iv, wrapped_key, mode)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   created_at = excluded.created_at,
                   salt = excluded.salt,
                   iv = excluded.iv,
                   wrapped_key = excluded.wrapped_key,
                   mode = excluded.mode",
                params![
                    record.id,
                    record.created_at,
                    record.salt,
                    record.iv,
                    record.wrapped_key,
                    record.mode,
                ],
            )
            .map_err(sql)?;
        Ok(())
    }

    fn fetch(&self, id: &str) -> StrataResult<Option<VaultRecord>> {
        self.conn()?
            .query_row(
                "SELECT id, created_at, salt, iv, wrapped_key, mode FROM keys WHERE id = ?1",
                params![id],
                |r| {
                    Ok(VaultRecord {
                        id: r.get(0)?,
                        created_at: r.get(1)?,
                        salt: r.get(2)?,
                        iv: r.get(3)?,
                        wrapped_key: r.get(4)?,
                        mode: r.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(sql)
    }

    fn list(&self) -> StrataResult<Vec<KeySummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, created_at, mode FROM keys ORDER BY id")
            .map_err(sql)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(KeySummary {
                    id: r.get(0)?,
                    created_at: r.get(1)?,
                    mode: r.get(2)?,
                })
            })
            .map_err(sql)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, VaultRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> StrataResult<std::sync::MutexGuard<'_, BTreeMap<String, VaultRecord>>> {
        self.records
            .lock()
            .map_err(|_| StrataError::Storage("memory store lock poisoned".into()))
    }
}

impl VaultStore for MemoryStore {
    fn upsert(&self, record: &VaultRecord) -> StrataResult<()> {
        self.records()?.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn fetch(&self, id: &str) -> StrataResult<Option<VaultRecord>> {
        Ok(self.records()?.get(id).cloned())
    }

    fn list(&self) -> StrataResult<Vec<KeySummary>> {
        Ok(self.records()?.values().map(KeySummary::from).collect())
    }
}

fn sql(e: rusqlite::Error) -> StrataError {
    StrataError::Storage(format!("vault database: {e}"))
}
