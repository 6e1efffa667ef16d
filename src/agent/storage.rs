//! Named response caches and their SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use url::Url;

use super::http::{body_digest, Response, ResponseKind};
use crate::error::AgentError;

/// A response read back from a cache bucket.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Buckets are addressed by name; entries inside a bucket by request URL.
pub trait CacheStorage: Send + Sync {
  /// Create the bucket if it does not exist.
  fn open(&self, cache: &str) -> Result<(), AgentError>;

  /// Names of every existing bucket, oldest first.
  fn keys(&self) -> Result<Vec<String>, AgentError>;

  /// Delete a bucket and all its entries. Returns false if it did not exist.
  fn delete(&self, cache: &str) -> Result<bool, AgentError>;

  /// Look up the entry stored for `url` in `cache`.
  fn match_url(&self, cache: &str, url: &Url) -> Result<Option<CachedResponse>, AgentError>;

  /// Store a single entry, replacing any previous one for the same URL.
  fn put(&self, cache: &str, url: &Url, response: &Response) -> Result<(), AgentError>;

  /// Store several entries atomically: either all are written or none.
  fn put_all(&self, cache: &str, entries: &[(Url, Response)]) -> Result<(), AgentError>;

  /// Request URLs stored in `cache`.
  fn urls(&self, cache: &str) -> Result<Vec<String>, AgentError>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  /// Open (or create) cache storage at `path`.
  pub fn open(path: &Path) -> Result<Self, AgentError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn in_memory() -> Result<Self, AgentError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, AgentError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
    self.conn.lock().map_err(|_| AgentError::Poisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_url)
);
"#;

fn insert_entry(conn: &Connection, cache: &str, url: &Url, response: &Response) -> Result<(), AgentError> {
  let headers = serde_json::to_string(&response.headers)?;

  conn.execute(
    "INSERT OR IGNORE INTO caches (name) VALUES (?)",
    params![cache],
  )?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (cache_name, request_url, response_url, status, kind, headers, body, digest, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      cache,
      url.as_str(),
      response.url.as_str(),
      response.status,
      response.kind.as_str(),
      headers,
      response.body,
      response.digest(),
    ],
  )?;
  Ok(())
}

impl CacheStorage for SqliteCacheStorage {
  fn open(&self, cache: &str) -> Result<(), AgentError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, AgentError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY created_at, name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn delete(&self, cache: &str) -> Result<bool, AgentError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache],
    )?;
    let removed = tx.execute("DELETE FROM caches WHERE name = ?", params![cache])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn match_url(&self, cache: &str, url: &Url) -> Result<Option<CachedResponse>, AgentError> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT response_url, status, kind, headers, body, digest, cached_at
         FROM cache_entries WHERE cache_name = ? AND request_url = ?",
        params![cache, url.as_str()],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Vec<u8>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
          ))
        },
      )
      .optional()?;

    let Some((response_url, status, kind, headers, body, digest, cached_at)) = row else {
      return Ok(None);
    };

    if body_digest(&body) != digest {
      warn!(cache, url = %url, "cached body does not match its digest, ignoring entry");
      return Ok(None);
    }

    let (Ok(response_url), Some(kind), Ok(headers), Some(cached_at)) = (
      Url::parse(&response_url),
      ResponseKind::parse(&kind),
      serde_json::from_str::<Vec<(String, String)>>(&headers),
      parse_datetime(&cached_at),
    ) else {
      warn!(cache, url = %url, "malformed cache entry, ignoring");
      return Ok(None);
    };

    Ok(Some(CachedResponse {
      response: Response {
        url: response_url,
        status,
        kind,
        headers,
        body,
      },
      cached_at,
    }))
  }

  fn put(&self, cache: &str, url: &Url, response: &Response) -> Result<(), AgentError> {
    let conn = self.lock()?;
    insert_entry(&conn, cache, url, response)
  }

  fn put_all(&self, cache: &str, entries: &[(Url, Response)]) -> Result<(), AgentError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )?;
    for (url, response) in entries {
      insert_entry(&tx, cache, url, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn urls(&self, cache: &str) -> Result<Vec<String>, AgentError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT request_url FROM cache_entries WHERE cache_name = ? ORDER BY request_url",
    )?;
    let urls = stmt
      .query_map(params![cache], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(urls)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .ok()
}
