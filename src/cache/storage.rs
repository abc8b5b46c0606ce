//! Partition registry trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::types::{CachedResponse, RequestKey, Response};

/// Registry of named cache partitions.
///
/// Every partition maps a normalized request key to the last response
/// captured for it. Writing into a partition that does not exist creates it.
pub trait PartitionStore: Send + Sync + 'static {
  /// Create an empty partition (no-op if it already exists).
  fn create_partition(&self, name: &str) -> Result<()>;

  /// Names of all existing partitions, oldest first.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Look up an entry in one partition.
  fn lookup(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Number of entries in a partition.
  fn entry_count(&self, partition: &str) -> Result<usize>;

  /// Delete every partition. Returns how many were removed.
  fn clear(&self) -> Result<usize> {
    let mut removed = 0;
    for name in self.partition_names()? {
      if self.delete_partition(&name)? {
        removed += 1;
      }
    }
    Ok(removed)
  }
}

/// SQLite-based partition storage. Also hosts the per-session version state.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Private in-memory database, used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }

  pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, keyed by sha256 of "METHOD url"
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition);

-- Version check state, one row per tab session
CREATE TABLE IF NOT EXISTS session_state (
    session_id TEXT PRIMARY KEY,
    local_version TEXT,
    pending_version TEXT,
    last_check_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl PartitionStore for SqliteStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries
         (partition, key_hash, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key.hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE partition = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, key.hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
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

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", partition, e))?;
    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
