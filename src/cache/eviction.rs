//! Oldest-first eviction for bounded tiers.

use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;

/// Outcome of an eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
  /// Entries actually deleted
  pub removed: usize,
  /// Deletes that failed; the sweep carried on past them
  pub failed: usize,
  /// Entries left in the tier
  pub remaining: usize,
}

/// Trim `tier` down to `max_items` entries, deleting the oldest insertions first.
///
/// Only reading the key list can fail the sweep. A failing delete is logged and
/// skipped so the rest of the sweep still runs.
pub fn enforce_limit<S>(storage: &S, tier: &str, max_items: usize) -> Result<EvictionReport>
where
  S: CacheStorage + ?Sized,
{
  let keys = storage.keys_oldest_first(tier)?;
  let count = keys.len();

  if count <= max_items {
    debug!(tier, count, max_items, "Tier within limit");
    return Ok(EvictionReport {
      remaining: count,
      ..EvictionReport::default()
    });
  }

  let mut report = EvictionReport::default();
  let mut vanished = 0;
  for key in keys.iter().take(count - max_items) {
    match storage.delete(tier, key) {
      Ok(true) => report.removed += 1,
      // Someone else got there first
      Ok(false) => vanished += 1,
      Err(e) => {
        warn!(tier, url = %key.url, "Eviction delete failed: {:#}", e);
        report.failed += 1;
      }
    }
  }

  report.remaining = count - report.removed - vanished;
  info!(
    tier,
    removed = report.removed,
    failed = report.failed,
    remaining = report.remaining,
    "Cache trimmed"
  );

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::types::{CacheEntry, CachedResponse, RequestKey};
  use color_eyre::eyre::eyre;

  fn key(i: usize) -> RequestKey {
    RequestKey::get(format!("https://app.example/api/{}", i))
  }

  fn fill(storage: &SqliteStorage, tier: &str, n: usize) {
    for i in 0..n {
      storage
        .put(tier, &key(i), &CachedResponse::new(200, i.to_string()))
        .unwrap();
    }
  }

  #[test]
  fn test_keeps_most_recent_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    fill(&storage, "dynamic", 25);

    let report = enforce_limit(&storage, "dynamic", 20).unwrap();

    assert_eq!(report.removed, 5);
    assert_eq!(report.remaining, 20);
    let keys = storage.keys_oldest_first("dynamic").unwrap();
    assert_eq!(keys, (5..25).map(key).collect::<Vec<_>>());
  }

  #[test]
  fn test_within_limit_is_noop() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    fill(&storage, "dynamic", 3);

    let report = enforce_limit(&storage, "dynamic", 3).unwrap();

    assert_eq!(report.removed, 0);
    assert_eq!(report.remaining, 3);
  }

  #[test]
  fn test_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    fill(&storage, "dynamic", 12);

    enforce_limit(&storage, "dynamic", 10).unwrap();
    let second = enforce_limit(&storage, "dynamic", 10).unwrap();

    assert_eq!(second.removed, 0);
    assert_eq!(storage.entry_count("dynamic").unwrap(), 10);
  }

  #[test]
  fn test_other_tiers_untouched() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    fill(&storage, "dynamic", 5);
    fill(&storage, "static", 5);

    enforce_limit(&storage, "dynamic", 1).unwrap();

    assert_eq!(storage.entry_count("dynamic").unwrap(), 1);
    assert_eq!(storage.entry_count("static").unwrap(), 5);
  }

  /// Delegates to SQLite, except that deleting `stuck` fails and `raced` is
  /// removed behind the caller's back before its delete runs.
  struct FlakyStorage {
    inner: SqliteStorage,
    stuck: Option<RequestKey>,
    raced: Option<RequestKey>,
  }

  impl CacheStorage for FlakyStorage {
    fn open_tiers(&self, tiers: &[&str]) -> Result<()> {
      self.inner.open_tiers(tiers)
    }
    fn tier_names(&self) -> Result<Vec<String>> {
      self.inner.tier_names()
    }
    fn delete_tier(&self, tier: &str) -> Result<bool> {
      self.inner.delete_tier(tier)
    }
    fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
      self.inner.get(tier, key)
    }
    fn put(&self, tier: &str, key: &RequestKey, response: &CachedResponse) -> Result<()> {
      self.inner.put(tier, key, response)
    }
    fn put_all(&self, tier: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()> {
      self.inner.put_all(tier, entries)
    }
    fn delete(&self, tier: &str, key: &RequestKey) -> Result<bool> {
      if self.stuck.as_ref() == Some(key) {
        return Err(eyre!("disk I/O error"));
      }
      if self.raced.as_ref() == Some(key) {
        self.inner.delete(tier, key)?;
      }
      self.inner.delete(tier, key)
    }
    fn keys_oldest_first(&self, tier: &str) -> Result<Vec<RequestKey>> {
      self.inner.keys_oldest_first(tier)
    }
    fn clear(&self, tier: &str) -> Result<()> {
      self.inner.clear(tier)
    }
    fn entry_count(&self, tier: &str) -> Result<usize> {
      self.inner.entry_count(tier)
    }
  }

  #[test]
  fn test_failed_delete_does_not_abort_sweep() {
    let inner = SqliteStorage::open_in_memory().unwrap();
    fill(&inner, "dynamic", 6);
    let storage = FlakyStorage {
      inner,
      stuck: Some(key(1)),
      raced: None,
    };

    let report = enforce_limit(&storage, "dynamic", 2).unwrap();

    assert_eq!(report.removed, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 3);
    let keys = storage.keys_oldest_first("dynamic").unwrap();
    assert_eq!(keys, vec![key(1), key(4), key(5)]);
  }

  #[test]
  fn test_already_deleted_entries_not_counted_as_remaining() {
    let inner = SqliteStorage::open_in_memory().unwrap();
    fill(&inner, "dynamic", 6);
    let storage = FlakyStorage {
      inner,
      stuck: None,
      raced: Some(key(0)),
    };

    let report = enforce_limit(&storage, "dynamic", 2).unwrap();

    assert_eq!(report.removed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 2);
    assert_eq!(storage.entry_count("dynamic").unwrap(), report.remaining);
  }
}
