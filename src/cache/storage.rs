//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

use super::types::{CachedResponse, EntrySummary, RequestKey};
use crate::net::Response;

/// Failures of the persistent store. Fatal for the lifecycle event that hit them.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("Could not determine data directory")]
  NoDataDir,

  #[error("Failed to create cache directory: {0}")]
  Io(#[from] std::io::Error),

  #[error("Failed to open cache database at {path}: {source}")]
  Open {
    path: String,
    source: rusqlite::Error,
  },

  #[error("Cache database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Cache database lock poisoned")]
  Poisoned,

  #[error("Corrupt cache entry: {0}")]
  Corrupt(String),
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores; each store maps a
/// [`RequestKey`] to a response.
pub trait CacheStorage: Send + Sync {
  /// Create the store if it does not exist yet.
  fn open(&self, name: &str) -> Result<(), StorageError>;

  /// Names of all stores, oldest first.
  fn keys(&self) -> Result<Vec<String>, StorageError>;

  fn has(&self, name: &str) -> Result<bool, StorageError>;

  /// Remove a store and everything in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool, StorageError>;

  /// Look up an exact request identity in one store.
  fn match_request(
    &self,
    name: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>, StorageError>;

  /// Write a batch of entries in one transaction (insert or replace by key).
  /// Creates the store if needed.
  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<(), StorageError>;

  /// Entries of a store, in URL order.
  fn entries(&self, name: &str) -> Result<Vec<EntrySummary>, StorageError>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at the default location.
  pub fn open_default() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the database at `path`.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path).map_err(|source| StorageError::Open {
      path: path.display().to_string(),
      source,
    })?;

    Self::with_connection(conn)
  }

  /// A throwaway database that lives as long as this value.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self, StorageError> {
    let conn = Connection::open_in_memory().map_err(|source| StorageError::Open {
      path: ":memory:".to_string(),
      source,
    })?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StorageError::NoDataDir)?;

    Ok(data_dir.join("dossier-offline").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::Poisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per named store
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request identity hash
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![name],
    )?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY id")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn has(&self, name: &str) -> Result<bool, StorageError> {
    let conn = self.lock()?;
    let exists = conn.query_row(
      "SELECT EXISTS(SELECT 1 FROM caches WHERE name = ?)",
      params![name],
      |row| row.get(0),
    )?;
    Ok(exists)
  }

  fn delete(&self, name: &str) -> Result<bool, StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let entries = tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )?;
    let removed = tx.execute("DELETE FROM caches WHERE name = ?", params![name])?;
    tx.commit()?;

    debug!(cache = name, entries, "deleted cache store");
    Ok(removed > 0)
  }

  fn match_request(
    &self,
    name: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>, StorageError> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![name, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| StorageError::Corrupt(format!("headers for {}: {}", key.url, e)))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<(), StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![name],
    )?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| StorageError::Corrupt(format!("headers for {}: {}", key.url, e)))?;
      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, request_hash, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          headers,
          response.body
        ],
      )?;
    }

    // Nothing is visible until every entry is written
    tx.commit()?;
    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<EntrySummary>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT method, url, status, length(body), cached_at FROM cache_entries
       WHERE cache_name = ?
       ORDER BY url, method",
    )?;

    let rows = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, u16>(2)?,
          row.get::<_, i64>(3)?,
          row.get::<_, String>(4)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    rows
      .into_iter()
      .map(|(method, url, status, size, cached_at)| {
        Ok(EntrySummary {
          method,
          url,
          status,
          size: usize::try_from(size).unwrap_or_default(),
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| StorageError::Corrupt(format!("timestamp '{}': {}", s, e)))
}
