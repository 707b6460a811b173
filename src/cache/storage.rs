//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::db::Database;
use crate::net::{Headers, Response};

use super::traits::CachedEntry;

/// Trait for cache storage backends.
///
/// Each call is atomic on its own; there are no cross-key transactions.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// Look up a URL in a single partition.
  fn match_in(&self, partition: &str, url: &str) -> Result<Option<CachedEntry>>;

  /// Look up a URL across all partitions, oldest partition first.
  fn match_any(&self, url: &str) -> Result<Option<CachedEntry>>;

  /// Store a response, overwriting any previous entry for the URL.
  fn put(&self, partition: &str, url: &str, response: &Response) -> Result<()>;

  /// Names of all partitions in creation order.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns whether it existed.
  fn delete(&self, partition: &str) -> Result<bool>;

  /// Total body bytes stored in a partition.
  fn size(&self, partition: &str) -> Result<u64>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_entry((url, status, headers, body, cached_at): EntryRow) -> Result<CachedEntry> {
  let headers: Headers = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to decode headers of {}: {}", url, e))?;

  Ok(CachedEntry {
    response: Response {
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
    url,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, partition: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    Ok(())
  }

  fn match_in(&self, partition: &str, url: &str) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;

    let row = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE partition_name = ? AND url = ?",
        params![partition, url],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query partition {}: {}", partition, e))?;

    row.map(into_entry).transpose()
  }

  fn match_any(&self, url: &str) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;

    let row = conn
      .query_row(
        "SELECT e.url, e.status, e.headers, e.body, e.cached_at FROM cache_entries e
         INNER JOIN cache_partitions p ON p.name = e.partition_name
         WHERE e.url = ?
         ORDER BY p.rowid
         LIMIT 1",
        params![url],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query caches: {}", e))?;

    row.map(into_entry).transpose()
  }

  fn put(&self, partition: &str, url: &str, response: &Response) -> Result<()> {
    let mut conn = self.db.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to encode headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries (partition_name, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, datetime('now'))",
      params![partition, url, response.status, headers, response.body],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, partition: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition_name = ?",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_partitions WHERE name = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn size(&self, partition: &str) -> Result<u64> {
    let conn = self.db.conn()?;

    let size: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM cache_entries WHERE partition_name = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to measure partition {}: {}", partition, e))?;

    Ok(size.max(0) as u64)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
