//! Test doubles for the network, the oracle and a failing store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};

use super::context::PolicyContext;
use super::engine::PolicyEngine;
use super::power::{PowerOracle, PowerState};
use super::storage::{CacheStorage, SqliteStorage};
use super::types::{CacheEntry, CachedResponse, Request, RequestKey};
use crate::config::Config;
use crate::net::Fetcher;

#[derive(Clone)]
enum Route {
  Respond(CachedResponse),
  Fail,
  Hang,
}

/// Fetcher answering from a fixed route table. Unknown URLs get a 200 whose
/// body is the URL itself.
#[derive(Default)]
pub struct FakeFetcher {
  routes: HashMap<String, Route>,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
    self.respond_with(url, CachedResponse::new(status, body))
  }

  pub fn respond_with(mut self, url: &str, response: CachedResponse) -> Self {
    self.routes.insert(url.to_string(), Route::Respond(response));
    self
  }

  pub fn fail(mut self, url: &str) -> Self {
    self.routes.insert(url.to_string(), Route::Fail);
    self
  }

  pub fn hang(mut self, url: &str) -> Self {
    self.routes.insert(url.to_string(), Route::Hang);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<CachedResponse> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    match self.routes.get(&request.url).cloned() {
      Some(Route::Respond(response)) => Ok(response),
      Some(Route::Fail) => Err(eyre!("connection refused: {}", request.url)),
      Some(Route::Hang) => {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(eyre!("hung request finished"))
      }
      None => Ok(CachedResponse::new(200, request.url.as_bytes().to_vec())),
    }
  }
}

/// Oracle that returns the same state every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedOracle(pub PowerState);

impl PowerOracle for FixedOracle {
  fn current_power_state(&self) -> PowerState {
    self.0
  }
}

/// Store whose every operation fails.
pub struct BrokenStorage;

impl CacheStorage for BrokenStorage {
  fn open_tiers(&self, _tiers: &[&str]) -> Result<()> {
    Err(eyre!("database is locked"))
  }
  fn tier_names(&self) -> Result<Vec<String>> {
    Err(eyre!("database is locked"))
  }
  fn delete_tier(&self, _tier: &str) -> Result<bool> {
    Err(eyre!("database is locked"))
  }
  fn get(&self, _tier: &str, _key: &RequestKey) -> Result<Option<CacheEntry>> {
    Err(eyre!("database is locked"))
  }
  fn put(&self, _tier: &str, _key: &RequestKey, _response: &CachedResponse) -> Result<()> {
    Err(eyre!("database is locked"))
  }
  fn put_all(&self, _tier: &str, _entries: &[(RequestKey, CachedResponse)]) -> Result<()> {
    Err(eyre!("database is locked"))
  }
  fn delete(&self, _tier: &str, _key: &RequestKey) -> Result<bool> {
    Err(eyre!("database is locked"))
  }
  fn keys_oldest_first(&self, _tier: &str) -> Result<Vec<RequestKey>> {
    Err(eyre!("database is locked"))
  }
  fn clear(&self, _tier: &str) -> Result<()> {
    Err(eyre!("database is locked"))
  }
  fn entry_count(&self, _tier: &str) -> Result<usize> {
    Err(eyre!("database is locked"))
  }
}

pub fn test_context() -> PolicyContext {
  let config = Config::from_yaml(
    r#"
origin: "https://app.example/"
bootstrap: ["./", "./index.html", "./manifest.json"]
"#,
  )
  .expect("test config");
  PolicyContext::from_config(&config).expect("test context")
}

pub fn engine(
  fetcher: FakeFetcher,
  power: PowerState,
) -> PolicyEngine<SqliteStorage, FakeFetcher, FixedOracle> {
  let storage = SqliteStorage::open_in_memory().expect("in-memory storage");
  engine_with(storage, fetcher, power)
}

pub fn engine_with<S: CacheStorage>(
  storage: S,
  fetcher: FakeFetcher,
  power: PowerState,
) -> PolicyEngine<S, FakeFetcher, FixedOracle> {
  PolicyEngine::new(test_context(), storage, fetcher, FixedOracle(power))
}
