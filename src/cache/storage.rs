//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::types::{CacheEntry, CachedResponse, RequestKey};

/// Trait for cache storage backends.
///
/// A store is a set of named tiers. Each tier maps request keys to responses
/// and remembers insertion order, which is the only signal eviction uses.
pub trait CacheStorage: Send + Sync {
  /// Create the named tiers. Existing tiers are left untouched.
  fn open_tiers(&self, tiers: &[&str]) -> Result<()>;

  /// Names of every tier currently stored.
  fn tier_names(&self) -> Result<Vec<String>>;

  /// Drop a tier and all its entries. Returns whether it existed.
  fn delete_tier(&self, tier: &str) -> Result<bool>;

  /// Look up a single entry.
  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry. New keys go to the tail of the tier's order,
  /// replaced keys keep their position.
  fn put(&self, tier: &str, key: &RequestKey, response: &CachedResponse) -> Result<()>;

  /// Put several entries atomically: either all are stored or none.
  fn put_all(&self, tier: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()>;

  /// Remove an entry. Returns whether it existed.
  fn delete(&self, tier: &str, key: &RequestKey) -> Result<bool>;

  /// Snapshot of the tier's keys, oldest insertion first.
  fn keys_oldest_first(&self, tier: &str) -> Result<Vec<RequestKey>>;

  /// Remove every entry of a tier. The tier stays open.
  fn clear(&self, tier: &str) -> Result<()>;

  /// Number of entries in a tier.
  fn entry_count(&self, tier: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => crate::config::Config::data_dir()?.join("cache.db"),
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_tiers (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached request; seq orders entries within a tier
CREATE TABLE IF NOT EXISTS cache_entries (
    tier TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    seq INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tier, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_order ON cache_entries(tier, seq);

-- Monotonic insertion counter shared by all tiers
CREATE TABLE IF NOT EXISTS cache_sequence (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    next INTEGER NOT NULL
);

INSERT OR IGNORE INTO cache_sequence (id, next) VALUES (0, 1);
"#;

/// Insert or replace one entry on an open connection or transaction.
fn upsert_entry(
  conn: &Connection,
  tier: &str,
  key: &RequestKey,
  response: &CachedResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_tiers (name) VALUES (?)",
      params![tier],
    )
    .map_err(|e| eyre!("Failed to register tier {}: {}", tier, e))?;

  let seq: i64 = conn
    .query_row("SELECT next FROM cache_sequence WHERE id = 0", [], |row| {
      row.get(0)
    })
    .map_err(|e| eyre!("Failed to read insertion sequence: {}", e))?;
  conn
    .execute("UPDATE cache_sequence SET next = next + 1 WHERE id = 0", [])
    .map_err(|e| eyre!("Failed to advance insertion sequence: {}", e))?;

  // On conflict the original seq is kept, so a replaced entry keeps its position
  conn
    .execute(
      "INSERT INTO cache_entries (tier, key_hash, method, url, status, headers, body, seq, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
       ON CONFLICT (tier, key_hash) DO UPDATE SET
         status = excluded.status,
         headers = excluded.headers,
         body = excluded.body,
         cached_at = excluded.cached_at",
      params![
        tier,
        key.hash(),
        key.method,
        key.url,
        response.status,
        headers,
        response.body,
        seq
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_tiers(&self, tiers: &[&str]) -> Result<()> {
    let conn = self.lock()?;

    for tier in tiers {
      conn
        .execute(
          "INSERT OR IGNORE INTO cache_tiers (name) VALUES (?)",
          params![tier],
        )
        .map_err(|e| eyre!("Failed to open tier {}: {}", tier, e))?;
    }

    Ok(())
  }

  fn tier_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_tiers ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list tiers: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read tier name: {}", e))?;

    Ok(names)
  }

  fn delete_tier(&self, tier: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE tier = ?", params![tier])
      .map_err(|e| eyre!("Failed to delete entries of tier {}: {}", tier, e))?;
    let removed = tx
      .execute("DELETE FROM cache_tiers WHERE name = ?", params![tier])
      .map_err(|e| eyre!("Failed to delete tier {}: {}", tier, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, seq, cached_at FROM cache_entries
         WHERE tier = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, i64, String)> = stmt
      .query_row(params![tier, key.hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key.url, e))?;

    match row {
      Some((status, headers, body, seq, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key.url, e))?;
        Ok(Some(CacheEntry {
          key: key.clone(),
          response: CachedResponse {
            status,
            headers,
            body,
          },
          inserted_at: seq as u64,
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, tier: &str, key: &RequestKey, response: &CachedResponse) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    upsert_entry(&tx, tier, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, tier: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // Dropping the transaction on error rolls back every write
    for (key, response) in entries {
      upsert_entry(&tx, tier, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, tier: &str, key: &RequestKey) -> Result<bool> {
    let conn = self.lock()?;

    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE tier = ? AND key_hash = ?",
        params![tier, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete entry {}: {}", key.url, e))?;

    Ok(removed > 0)
  }

  fn keys_oldest_first(&self, tier: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE tier = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![tier], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys of tier {}: {}", tier, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn clear(&self, tier: &str) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE tier = ?", params![tier])
      .map_err(|e| eyre!("Failed to clear tier {}: {}", tier, e))?;
    tx.execute(
      "INSERT OR IGNORE INTO cache_tiers (name) VALUES (?)",
      params![tier],
    )
    .map_err(|e| eyre!("Failed to reopen tier {}: {}", tier, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, tier: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE tier = ?",
        params![tier],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of tier {}: {}", tier, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(format!("https://app.example/{}", path))
  }

  fn urls(keys: &[RequestKey]) -> Vec<&str> {
    keys.iter().map(|k| k.url.as_str()).collect()
  }

  #[test]
  fn test_round_trip_is_byte_identical() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let response = CachedResponse::new(200, vec![0u8, 159, 146, 150, 255, 10])
      .with_header("content-type", "application/octet-stream")
      .with_header("etag", "\"abc\"");

    storage.put("dynamic", &key("blob"), &response).unwrap();
    let entry = storage.get("dynamic", &key("blob")).unwrap().unwrap();

    assert_eq!(entry.response, response);
    assert_eq!(entry.key, key("blob"));
  }

  #[test]
  fn test_get_missing_returns_none() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.get("dynamic", &key("nope")).unwrap().is_none());
  }

  #[test]
  fn test_tiers_are_isolated() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("static", &key("a.css"), &CachedResponse::new(200, "a"))
      .unwrap();

    assert!(storage.get("dynamic", &key("a.css")).unwrap().is_none());
    assert_eq!(storage.entry_count("static").unwrap(), 1);
    assert_eq!(storage.entry_count("dynamic").unwrap(), 0);
  }

  #[test]
  fn test_insertion_order_and_replace_keeps_position() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for path in ["a", "b", "c"] {
      storage
        .put("dynamic", &key(path), &CachedResponse::new(200, path))
        .unwrap();
    }

    storage
      .put("dynamic", &key("a"), &CachedResponse::new(200, "a2"))
      .unwrap();

    let keys = storage.keys_oldest_first("dynamic").unwrap();
    assert_eq!(
      urls(&keys),
      vec![
        "https://app.example/a",
        "https://app.example/b",
        "https://app.example/c"
      ]
    );
    let entry = storage.get("dynamic", &key("a")).unwrap().unwrap();
    assert_eq!(entry.response.body, b"a2".to_vec());
  }

  #[test]
  fn test_delete_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("dynamic", &key("a"), &CachedResponse::new(200, "a"))
      .unwrap();

    assert!(storage.delete("dynamic", &key("a")).unwrap());
    assert!(!storage.delete("dynamic", &key("a")).unwrap());
    assert_eq!(storage.entry_count("dynamic").unwrap(), 0);
  }

  #[test]
  fn test_clear_leaves_tier_usable() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_tiers(&["dynamic"]).unwrap();
    storage
      .put("dynamic", &key("a"), &CachedResponse::new(200, "a"))
      .unwrap();

    storage.clear("dynamic").unwrap();
    assert_eq!(storage.entry_count("dynamic").unwrap(), 0);
    assert!(storage.tier_names().unwrap().contains(&"dynamic".to_string()));

    storage
      .put("dynamic", &key("b"), &CachedResponse::new(200, "b"))
      .unwrap();
    assert_eq!(storage.entry_count("dynamic").unwrap(), 1);
  }

  #[test]
  fn test_open_tiers_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_tiers(&["static", "dynamic"]).unwrap();
    storage
      .put("static", &key("a.css"), &CachedResponse::new(200, "a"))
      .unwrap();

    storage.open_tiers(&["static", "dynamic"]).unwrap();

    assert_eq!(
      storage.tier_names().unwrap(),
      vec!["dynamic".to_string(), "static".to_string()]
    );
    assert_eq!(storage.entry_count("static").unwrap(), 1);
  }

  #[test]
  fn test_delete_tier_drops_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("old", &key("a"), &CachedResponse::new(200, "a"))
      .unwrap();

    assert!(storage.delete_tier("old").unwrap());
    assert!(!storage.delete_tier("old").unwrap());
    assert!(storage.tier_names().unwrap().is_empty());
    assert_eq!(storage.entry_count("old").unwrap(), 0);
  }

  #[test]
  fn test_put_all_keeps_batch_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      (key("a"), CachedResponse::new(200, "a")),
      (key("b"), CachedResponse::new(200, "b")),
    ];

    storage.put_all("static", &entries).unwrap();

    assert_eq!(
      urls(&storage.keys_oldest_first("static").unwrap()),
      vec!["https://app.example/a", "https://app.example/b"]
    );
  }

  #[test]
  fn test_put_all_rolls_back_on_failure() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .lock()
      .unwrap()
      .execute_batch(
        "CREATE TRIGGER reject_b BEFORE INSERT ON cache_entries
         WHEN NEW.url = 'https://app.example/b'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
      )
      .unwrap();
    let entries = vec![
      (key("a"), CachedResponse::new(200, "a")),
      (key("b"), CachedResponse::new(200, "b")),
    ];

    assert!(storage.put_all("static", &entries).is_err());

    assert_eq!(storage.entry_count("static").unwrap(), 0);
    assert!(storage.get("static", &key("a")).unwrap().is_none());
    assert!(storage.tier_names().unwrap().is_empty());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteStorage::open(Some(path.as_path())).unwrap();
      storage
        .put("static", &key("index.html"), &CachedResponse::new(200, "<html>"))
        .unwrap();
    }

    let storage = SqliteStorage::open(Some(path.as_path())).unwrap();
    let entry = storage.get("static", &key("index.html")).unwrap().unwrap();
    assert_eq!(entry.response.body, b"<html>".to_vec());

    // Sequence continues after reopen, so new entries still sort last
    storage
      .put("static", &key("app.css"), &CachedResponse::new(200, "css"))
      .unwrap();
    let keys = storage.keys_oldest_first("static").unwrap();
    assert_eq!(keys.last().unwrap(), &key("app.css"));
  }
}
