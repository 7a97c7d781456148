//! Key/value persistence with `localStorage` semantics: string keys, string
//! values, whole-value writes, and a byte quota.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions};

mod schema;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: u64, quota: u64 },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A flat string key/value slot store.
pub trait Backend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&*self.db_path)?;
        prepare_connection(&conn)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.connect()?;
        f(&conn)
    }
}

impl Backend for StorageHandle {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_connection(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM local_storage WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let quota = self.options.quota();
        self.with_connection(|conn| {
            if let Some(quota) = quota {
                let others = usage_excluding(conn, key)?;
                check_quota(others, key, value, quota)?;
            }
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO local_storage (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
            Ok(())
        })
    }
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> anyhow::Result<StorageHandle> {
    let db_path = if storage.storage_path.as_os_str().is_empty() {
        &paths.storage_path
    } else {
        &storage.storage_path
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening storage {}", db_path.display()))?;
    prepare_connection(&conn).context("preparing storage connection")?;
    schema::apply(&conn)?;
    tracing::debug!(path = %db_path.display(), "local storage ready");
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Bytes held by every key other than `key`.
fn usage_excluding(conn: &Connection, key: &str) -> Result<u64, StorageError> {
    let used: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
         FROM local_storage
         WHERE key <> ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(used.max(0) as u64)
}

fn check_quota(others: u64, key: &str, value: &str, quota: u64) -> Result<(), StorageError> {
    let needed = others + key.len() as u64 + value.len() as u64;
    if needed > quota {
        return Err(StorageError::QuotaExceeded { needed, quota });
    }
    Ok(())
}

/// In-process backend for tests and ephemeral sessions. Clones share state,
/// so a clone handed to a second store behaves like a page reload.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    entries: IndexMap<String, String>,
    quota: Option<u64>,
    failing_writes: u32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        let backend = Self::default();
        backend.inner.lock().quota = Some(quota);
        backend
    }

    /// Makes the next `count` writes (set or remove) fail as if storage were
    /// disabled.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.lock().failing_writes = count;
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    fn take_failure(state: &mut MemoryState) -> Result<(), StorageError> {
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StorageError::Unavailable("storage disabled".into()));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        Self::take_failure(&mut state)?;
        if let Some(quota) = state.quota {
            let others = state
                .entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            check_quota(others, key, value, quota)?;
        }
        state.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        Self::take_failure(&mut state)?;
        state.entries.shift_remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn init_storage(quota_bytes: u64) -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let mut options = StorageOptions::default();
        options.storage_path = paths.storage_path.clone();
        options.quota_bytes = quota_bytes;
        let handle = init(&paths, &options)?;
        Ok((temp, handle))
    }

    #[test]
    fn sqlite_backend_sets_gets_and_removes() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage(0)?;
        assert_eq!(storage.get("localItems")?, None);

        storage.set("localItems", "[]")?;
        storage.set("localItems", "[1]")?;
        assert_eq!(storage.get("localItems")?.as_deref(), Some("[1]"));

        storage.remove("localItems")?;
        storage.remove("localItems")?;
        assert_eq!(storage.get("localItems")?, None);
        Ok(())
    }

    #[test]
    fn sqlite_backend_enforces_quota_without_clobbering() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage(16)?;
        storage.set("k", "small")?;
        let err = storage.set("k", &"x".repeat(64)).unwrap_err();
        assert_matches!(err, StorageError::QuotaExceeded { quota: 16, .. });
        assert_eq!(storage.get("k")?.as_deref(), Some("small"));
        Ok(())
    }

    #[test]
    fn sqlite_backend_survives_reopen() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let options = StorageOptions::default();
        init(&paths, &options)?.set("key", "value")?;
        let reopened = init(&paths, &options)?;
        assert_eq!(reopened.get("key")?.as_deref(), Some("value"));
        assert!(paths.storage_path.is_file());
        Ok(())
    }

    #[test]
    fn memory_backend_injected_failures_are_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(1);
        assert_matches!(backend.set("a", "1"), Err(StorageError::Unavailable(_)));
        assert!(backend.set("a", "1").is_ok());
        assert!(backend.contains_key("a"));
    }

    #[test]
    fn memory_backend_quota_counts_other_keys() {
        let backend = MemoryBackend::with_quota(10);
        assert!(backend.set("a", "1234").is_ok());
        assert_matches!(
            backend.set("b", "123456"),
            Err(StorageError::QuotaExceeded { needed: 12, quota: 10 })
        );
        assert!(backend.set("a", "12345678").is_ok());
    }
}
