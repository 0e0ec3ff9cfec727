//! SQLite-backed key-value store with optional per-entry expiry.
//!
//! The [`KvStore`] wraps a `rusqlite::Connection` behind an `Arc<Mutex<>>`
//! so handles are cheap to clone and safe to share between the dispatcher
//! worker and whatever thread invokes the exposed read paths. Every
//! operation takes the lock for the duration of a single statement, which
//! gives per-key atomicity and makes [`KvStore::delete_prefix`] atomic as a
//! set: no reader can observe a partially cleared prefix.
//!
//! Entries written with a TTL behave as absent once the TTL elapses; the
//! read path purges them lazily and [`KvStore::purge_expired`] sweeps the
//! rest.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Thread-safe handle to the sealed key-value database.
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    /// Open (or create) the store at `path` and apply pragmas + schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening kv store");

        let conn = Connection::open(path)?;
        Self::configure(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory kv store");

        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER
            );",
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Look up `key`. An entry past its expiry behaves as absent and is
    /// purged before returning.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();

        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((_, Some(expires_at))) if expires_at <= now => {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                debug!(key = key, "purged expired kv entry on read");
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
        }
    }

    /// [`KvStore::get`] with a default fallback for absent entries.
    pub fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// Insert or overwrite `key`. Returns the previous value, if any.
    pub fn put(&self, key: &str, value: &str) -> Result<Option<String>> {
        self.put_inner(key, value, None)
    }

    /// Insert or overwrite `key` with an expiry of `now + ttl`.
    pub fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<Option<String>> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        self.put_inner(key, value, Some(expires_at))
    }

    fn put_inner(&self, key: &str, value: &str, expires_at: Option<i64>) -> Result<Option<String>> {
        let conn = self.lock()?;

        let previous: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
            params![key, value, expires_at],
        )?;

        Ok(previous)
    }

    /// Remove `key` if present.
    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Remove every entry whose key starts with `prefix`, in one statement.
    /// Returns the number of entries removed.
    pub fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let conn = self.lock()?;
        let pattern = format!("{}%", like_escape(prefix));
        let removed = conn.execute(
            "DELETE FROM kv WHERE key LIKE ?1 ESCAPE '\\'",
            params![pattern],
        )?;

        debug!(prefix = prefix, removed = removed, "deleted kv prefix");
        Ok(removed)
    }

    /// Sweep every expired entry. Returns the number purged.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();
        let purged = conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;

        if purged > 0 {
            debug!(purged = purged, "purged expired kv entries");
        }
        Ok(purged)
    }

    /// Typed read: deserialize the stored string as JSON.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Typed write: serialize `value` as JSON before storing.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<Option<String>> {
        let raw = serde_json::to_string(value)?;
        self.put(key, &raw)
    }
}

/// Escape `%`, `_` and the escape character itself so caller-supplied
/// prefixes never act as LIKE wildcards.
fn like_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
