//! Named response caches, looked up by URL key.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use time::OffsetDateTime;

use super::fetch::{Response, ResponseKind};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored response for {url} is unreadable: {reason}")]
    Corrupt { url: String, reason: String },
}

pub trait CacheStorage {
    /// Creates the cache when it does not exist yet.
    fn open(&self, name: &str) -> Result<(), CacheError>;
    fn put(&self, cache: &str, url: &str, response: &Response) -> Result<(), CacheError>;
    /// Stores every entry or none of them.
    fn put_all(&self, cache: &str, entries: &[(String, Response)]) -> Result<(), CacheError> {
        self.open(cache)?;
        for (url, response) in entries {
            if let Err(err) = self.put(cache, url, response) {
                self.delete(cache)?;
                return Err(err);
            }
        }
        Ok(())
    }
    /// Searches every cache, oldest first.
    fn match_url(&self, url: &str) -> Result<Option<Response>, CacheError>;
    /// Cache names, oldest first.
    fn keys(&self) -> Result<Vec<String>, CacheError>;
    fn delete(&self, name: &str) -> Result<bool, CacheError>;
    /// URL keys stored in one cache.
    fn entries(&self, name: &str) -> Result<Vec<String>, CacheError>;
}

type CacheMap = IndexMap<String, IndexMap<String, Response>>;

/// Clones share the same caches.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    caches: Arc<Mutex<CacheMap>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open(&self, name: &str) -> Result<(), CacheError> {
        self.caches.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    fn put(&self, cache: &str, url: &str, response: &Response) -> Result<(), CacheError> {
        self.caches
            .lock()
            .entry(cache.to_string())
            .or_default()
            .insert(url.to_string(), response.clone());
        Ok(())
    }

    fn put_all(&self, cache: &str, entries: &[(String, Response)]) -> Result<(), CacheError> {
        let mut caches = self.caches.lock();
        let slot = caches.entry(cache.to_string()).or_default();
        for (url, response) in entries {
            slot.insert(url.clone(), response.clone());
        }
        Ok(())
    }

    fn match_url(&self, url: &str) -> Result<Option<Response>, CacheError> {
        Ok(self
            .caches
            .lock()
            .values()
            .find_map(|cache| cache.get(url).cloned()))
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.lock().keys().cloned().collect())
    }

    fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.lock().shift_remove(name).is_some())
    }

    fn entries(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let mut urls: Vec<String> = self
            .caches
            .lock()
            .get(name)
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default();
        urls.sort();
        Ok(urls)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (cache_id, url)
);
"#;

/// Caches persisted in a SQLite file, one connection per call.
#[derive(Debug, Clone)]
pub struct SqliteCacheStorage {
    db_path: Arc<PathBuf>,
}

impl SqliteCacheStorage {
    pub fn open_at(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening offline cache {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL for offline cache")?;
        conn.execute_batch(SCHEMA)
            .context("applying offline cache schema")?;
        tracing::debug!(path = %path.display(), "offline cache ready");
        Ok(Self {
            db_path: Arc::new(path.to_path_buf()),
        })
    }

    fn connect(&self) -> Result<Connection, CacheError> {
        Ok(Connection::open(&*self.db_path)?)
    }

    fn ensure_cache(conn: &Connection, name: &str) -> Result<i64, CacheError> {
        conn.execute(
            "INSERT INTO caches (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM caches WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn insert_entry(
        conn: &Connection,
        cache_id: i64,
        url: &str,
        response: &Response,
    ) -> Result<(), CacheError> {
        conn.execute(
            "INSERT INTO cache_entries (cache_id, url, status, kind, content_type, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(cache_id, url) DO UPDATE SET
                status = excluded.status,
                kind = excluded.kind,
                content_type = excluded.content_type,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![
                cache_id,
                url,
                response.status,
                response.kind.as_ref(),
                response.content_type,
                response.body,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;
        Ok(())
    }
}

impl CacheStorage for SqliteCacheStorage {
    fn open(&self, name: &str) -> Result<(), CacheError> {
        let conn = self.connect()?;
        Self::ensure_cache(&conn, name)?;
        Ok(())
    }

    fn put(&self, cache: &str, url: &str, response: &Response) -> Result<(), CacheError> {
        let conn = self.connect()?;
        let cache_id = Self::ensure_cache(&conn, cache)?;
        Self::insert_entry(&conn, cache_id, url, response)
    }

    fn put_all(&self, cache: &str, entries: &[(String, Response)]) -> Result<(), CacheError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let cache_id = Self::ensure_cache(&tx, cache)?;
        for (url, response) in entries {
            Self::insert_entry(&tx, cache_id, url, response)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn match_url(&self, url: &str) -> Result<Option<Response>, CacheError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT e.status, e.kind, e.content_type, e.body
                 FROM cache_entries e
                 JOIN caches c ON c.id = e.cache_id
                 WHERE e.url = ?1
                 ORDER BY c.id
                 LIMIT 1",
                params![url],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, kind, content_type, body)) = row else {
            return Ok(None);
        };
        let kind = ResponseKind::from_str(&kind).map_err(|err| CacheError::Corrupt {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Some(Response {
            status,
            kind,
            content_type,
            body,
        }))
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let id: Option<i64> = tx
            .query_row("SELECT id FROM caches WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(id) = id else {
            return Ok(false);
        };
        tx.execute("DELETE FROM cache_entries WHERE cache_id = ?1", params![id])?;
        tx.execute("DELETE FROM caches WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    fn entries(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT e.url FROM cache_entries e
             JOIN caches c ON c.id = e.cache_id
             WHERE c.name = ?1
             ORDER BY e.url",
        )?;
        let urls = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }
}
