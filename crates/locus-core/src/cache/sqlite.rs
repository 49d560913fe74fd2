//! SQLite persistent tier.

use super::traits::{PersistentStore, StoredEntry};
use crate::config::CacheDefaults;
use crate::error::{LocusError, Result};
use crate::service::Method;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tracing::{debug, warn};

/// SQLite-backed store for cache entries.
///
/// Holds a small pool of connections, each behind its own mutex. WAL mode
/// lets readers proceed while one writer commits; writes use short
/// `IMMEDIATE` transactions and are retried on `SQLITE_BUSY` /
/// `SQLITE_LOCKED`.
pub struct SqliteStore {
    pool: Vec<Mutex<Connection>>,
    next: AtomicUsize,
    path: PathBuf,
    busy_retries: u32,
}

impl SqliteStore {
    /// Open the store with the default pool size.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(db_path, CacheDefaults::DB_POOL_SIZE)
    }

    /// Open the store with `pool_size` connections.
    ///
    /// Creates the parent directory and schema if they don't exist.
    pub fn open_with(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| LocusError::Io {
                    message: format!("Failed to create cache directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let mut pool = Vec::with_capacity(pool_size.max(1));
        for i in 0..pool_size.max(1) {
            let conn = Connection::open(db_path).map_err(|e| LocusError::Database {
                message: format!("Failed to open cache database: {}", e),
                source: Some(e),
            })?;
            Self::configure_connection(&conn)?;
            if i == 0 {
                Self::ensure_schema(&conn)?;
            }
            pool.push(Mutex::new(conn));
        }

        debug!(
            "Opened cache database {} with {} connections",
            db_path.display(),
            pool.len()
        );

        Ok(Self {
            pool,
            next: AtomicUsize::new(0),
            path: db_path.to_path_buf(),
            busy_retries: CacheDefaults::DB_BUSY_RETRIES,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| LocusError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;
        conn.busy_timeout(Duration::from_millis(CacheDefaults::DB_BUSY_TIMEOUT_MS))
            .map_err(|e| LocusError::Database {
                message: format!("Failed to set busy timeout: {}", e),
                source: Some(e),
            })?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY NOT NULL,
                capability TEXT NOT NULL,
                method TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_capability
                ON cache_entries(capability, method);

            CREATE INDEX IF NOT EXISTS idx_cache_expires
                ON cache_entries(expires_at);
            "#,
        )
        .map_err(|e| LocusError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })
    }

    /// Take a free connection, or wait on the next one in rotation.
    fn acquire(&self) -> Result<MutexGuard<'_, Connection>> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        for offset in 0..self.pool.len() {
            let idx = (start + offset) % self.pool.len();
            match self.pool[idx].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(e)) => {
                    return Err(LocusError::Database {
                        message: format!("Cache connection poisoned: {}", e),
                        source: None,
                    })
                }
            }
        }
        self.pool[start].lock().map_err(|e| LocusError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Run `op` on a pooled connection, retrying while the database is busy.
    fn with_conn<T>(
        &self,
        what: &str,
        op: impl Fn(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let result = {
                let mut conn = self.acquire()?;
                op(&mut conn)
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt + 1 < self.busy_retries => {
                    attempt += 1;
                    debug!("{} hit a busy database, retry {}", what, attempt);
                    std::thread::sleep(CacheDefaults::DB_BUSY_BACKOFF * attempt);
                }
                Err(e) => {
                    return Err(LocusError::Database {
                        message: format!("{} failed: {}", what, e),
                        source: Some(e),
                    })
                }
            }
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEntry> {
    let method: String = row.get(2)?;
    let method = Method::parse(&method).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(LocusError::Validation {
                field: "method".to_string(),
                message: format!("unknown method '{}'", method),
            }),
        )
    })?;
    Ok(StoredEntry {
        key: row.get(0)?,
        capability: row.get(1)?,
        method,
        value: row.get(3)?,
        created_at: from_millis(row.get(4)?),
        expires_at: from_millis(row.get(5)?),
        hit_count: row.get::<_, i64>(6)?.max(0) as u64,
        last_accessed: from_millis(row.get(7)?),
    })
}

impl PersistentStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        self.with_conn("Cache read", |conn| {
            conn.query_row(
                "SELECT cache_key, capability, method, value, created_at, expires_at,
                        hit_count, last_accessed
                 FROM cache_entries WHERE cache_key = ?1",
                params![key],
                row_to_entry,
            )
            .optional()
        })
    }

    fn put(&self, entry: &StoredEntry) -> Result<()> {
        let result = self.with_conn("Cache write", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO cache_entries
                    (cache_key, capability, method, value, created_at, expires_at,
                     hit_count, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(cache_key) DO UPDATE SET
                    capability = excluded.capability,
                    method = excluded.method,
                    value = excluded.value,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at,
                    hit_count = excluded.hit_count,
                    last_accessed = excluded.last_accessed",
                params![
                    entry.key,
                    entry.capability,
                    entry.method.as_str(),
                    entry.value,
                    to_millis(entry.created_at),
                    to_millis(entry.expires_at),
                    entry.hit_count as i64,
                    to_millis(entry.last_accessed),
                ],
            )?;
            tx.commit()
        });

        match result {
            Err(LocusError::Database {
                source: Some(ref e),
                ..
            }) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                warn!("Concurrent cache write for {} lost the race", entry.key);
                Ok(())
            }
            other => other,
        }
    }

    fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn("Cache touch", |conn| {
            conn.execute(
                "UPDATE cache_entries
                 SET hit_count = hit_count + 1, last_accessed = ?2
                 WHERE cache_key = ?1",
                params![key, to_millis(now)],
            )
        })?;
        Ok(())
    }

    fn record_access(&self, key: &str, hit_count: u64, last_accessed: DateTime<Utc>) -> Result<()> {
        self.with_conn("Cache access update", |conn| {
            conn.execute(
                "UPDATE cache_entries
                 SET hit_count = MAX(hit_count, ?2), last_accessed = MAX(last_accessed, ?3)
                 WHERE cache_key = ?1",
                params![key, hit_count as i64, to_millis(last_accessed)],
            )
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let deleted = self.with_conn("Cache delete", |conn| {
            conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])
        })?;
        Ok(deleted > 0)
    }

    fn invalidate(&self, capability: &str, method: Option<Method>) -> Result<usize> {
        self.with_conn("Cache invalidation", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let deleted = match method {
                Some(m) => tx.execute(
                    "DELETE FROM cache_entries WHERE capability = ?1 AND method = ?2",
                    params![capability, m.as_str()],
                )?,
                None => tx.execute(
                    "DELETE FROM cache_entries WHERE capability = ?1",
                    params![capability],
                )?,
            };
            tx.commit()?;
            Ok(deleted)
        })
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self.with_conn("Cache sweep", |conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![to_millis(now)],
            )
        })?;
        if deleted > 0 {
            debug!("Swept {} expired cache rows", deleted);
        }
        Ok(deleted)
    }

    fn clear(&self) -> Result<usize> {
        self.with_conn("Cache clear", |conn| {
            conn.execute("DELETE FROM cache_entries", [])
        })
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self.with_conn("Cache count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
        })?;
        Ok(count.max(0) as usize)
    }
}
