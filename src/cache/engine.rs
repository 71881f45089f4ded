//! Request policy engine: decides per request between cache, network and
//! fallback, and admits successful responses into the right tier.

use std::collections::HashMap;
use std::fmt;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::classify::ResourceClass;
use super::context::PolicyContext;
use super::eviction::{enforce_limit, EvictionReport};
use super::power::PowerOracle;
use super::storage::CacheStorage;
use super::types::{CacheEntry, CacheResult, CacheSource, CachedResponse, Request, RequestKey};
use crate::net::Fetcher;

/// Failures surfaced to the caller. Everything else degrades to another source.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
  /// Offline, nothing cached, and not a navigation that the shell could answer.
  #[error("offline and no cached response for {url}")]
  OfflineMiss { url: String },

  /// The network attempt failed and no cached or raw response is available.
  #[error("no response for {url}: {reason}")]
  NoFallback { url: String, reason: String },
}

/// Why the network attempt did not produce an admissible response.
enum NetworkFailure {
  Status(CachedResponse),
  Error(String),
  Timeout,
}

impl fmt::Display for NetworkFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Status(response) => write!(f, "HTTP {}", response.status),
      Self::Error(e) => f.write_str(e),
      Self::Timeout => f.write_str("timed out"),
    }
  }
}

/// Orchestrates classification, store, oracle and network for each request.
///
/// Storage, network and environment are injected so the engine itself holds no
/// global state. Each configured tier has a write lock held across admission
/// and the eviction sweep that follows it.
pub struct PolicyEngine<S, F, O> {
  pub(super) ctx: PolicyContext,
  pub(super) storage: S,
  pub(super) fetcher: F,
  oracle: O,
  tier_locks: HashMap<String, Mutex<()>>,
}

impl<S, F, O> PolicyEngine<S, F, O>
where
  S: CacheStorage,
  F: Fetcher,
  O: PowerOracle,
{
  pub fn new(ctx: PolicyContext, storage: S, fetcher: F, oracle: O) -> Self {
    let tier_locks = ctx
      .tiers()
      .iter()
      .map(|tier| (tier.name.clone(), Mutex::new(())))
      .collect();

    Self {
      ctx,
      storage,
      fetcher,
      oracle,
      tier_locks,
    }
  }

  pub fn context(&self) -> &PolicyContext {
    &self.ctx
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Answer one intercepted GET.
  ///
  /// 1. Static resources are served from cache when present, with no network
  ///    or oracle access.
  /// 2. Offline: cache, then the shell document for navigations, else fail.
  /// 3. Network attempt, bounded by the fetch timeout.
  /// 4. A 200 is admitted if the power state allows, then returned.
  /// 5. Otherwise: cache, raw response, shell document, else fail.
  pub async fn handle_request(
    &self,
    request: &Request,
  ) -> Result<CacheResult<CachedResponse>, PolicyError> {
    let class = self.ctx.classifier.classify(&request.url);
    let key = request.key();

    if class == ResourceClass::Static {
      if let Some(entry) = self.lookup(&key) {
        debug!(url = %request.url, "Static resource served from cache");
        return Ok(CacheResult::from_entry(entry, CacheSource::Cache));
      }
    }

    let power = self.oracle.current_power_state();
    if !power.online {
      return self.serve_offline(request, &key);
    }
    let low_power = power.is_low_power(self.ctx.low_battery_threshold);

    let failure = match timeout(self.ctx.fetch_timeout, self.fetcher.fetch(request)).await {
      Ok(Ok(response)) if response.is_ok() => {
        self.admit(request, class, &response, low_power).await;
        return Ok(CacheResult::from_network(response));
      }
      Ok(Ok(response)) => NetworkFailure::Status(response),
      Ok(Err(e)) => NetworkFailure::Error(format!("{:#}", e)),
      Err(_) => NetworkFailure::Timeout,
    };

    self.fall_back(request, &key, failure)
  }

  /// Trim a configured tier to `max_items` while holding its write lock.
  pub async fn enforce_tier_limit(&self, tier: &str, max_items: usize) -> Result<EvictionReport> {
    let _guard = self.lock_tier(tier).await?;
    enforce_limit(&self.storage, tier, max_items)
  }

  pub(crate) async fn lock_tier(&self, tier: &str) -> Result<MutexGuard<'_, ()>> {
    let lock = self
      .tier_locks
      .get(tier)
      .ok_or_else(|| eyre!("Unknown cache tier '{}'", tier))?;
    Ok(lock.lock().await)
  }

  /// Probe the tiers in lookup order. Read faults count as misses.
  fn lookup(&self, key: &RequestKey) -> Option<CacheEntry> {
    for tier in &self.ctx.lookup_order {
      match self.storage.get(tier, key) {
        Ok(Some(entry)) => {
          debug!(tier = %tier, url = %entry.key.url, seq = entry.inserted_at, "Cache hit");
          return Some(entry);
        }
        Ok(None) => {}
        Err(e) => warn!(tier = %tier, url = %key.url, "Cache read failed, treating as miss: {:#}", e),
      }
    }
    None
  }

  fn shell_document(&self) -> Option<CacheEntry> {
    self.lookup(&RequestKey::get(self.ctx.root_document.clone()))
  }

  fn serve_offline(
    &self,
    request: &Request,
    key: &RequestKey,
  ) -> Result<CacheResult<CachedResponse>, PolicyError> {
    if let Some(entry) = self.lookup(key) {
      debug!(url = %request.url, "Offline, served from cache");
      return Ok(CacheResult::from_entry(entry, CacheSource::Offline));
    }

    if request.is_navigation() {
      if let Some(shell) = self.shell_document() {
        debug!(url = %request.url, "Offline, served shell document");
        return Ok(CacheResult::from_entry(shell, CacheSource::Shell));
      }
    }

    Err(PolicyError::OfflineMiss {
      url: request.url.clone(),
    })
  }

  fn fall_back(
    &self,
    request: &Request,
    key: &RequestKey,
    failure: NetworkFailure,
  ) -> Result<CacheResult<CachedResponse>, PolicyError> {
    let reason = failure.to_string();
    warn!(url = %request.url, "Network attempt failed: {}", reason);

    if let Some(entry) = self.lookup(key) {
      debug!(url = %request.url, "Recovered from cache");
      return Ok(CacheResult::from_entry(entry, CacheSource::Fallback));
    }

    if let NetworkFailure::Status(response) = failure {
      return Ok(CacheResult::from_network(response));
    }

    if request.is_navigation() {
      if let Some(shell) = self.shell_document() {
        debug!(url = %request.url, "Served shell document after network failure");
        return Ok(CacheResult::from_entry(shell, CacheSource::Shell));
      }
    }

    Err(PolicyError::NoFallback {
      url: request.url.clone(),
      reason,
    })
  }

  /// Best-effort write of a 200 response; faults are logged, never returned.
  async fn admit(
    &self,
    request: &Request,
    class: ResourceClass,
    response: &CachedResponse,
    low_power: bool,
  ) {
    if !self.ctx.classifier.should_cache(&request.url, low_power) {
      debug!(url = %request.url, "Low power, response not cached");
      return;
    }

    let tier = self.ctx.tier_for(class);
    let _guard = match self.lock_tier(&tier.name).await {
      Ok(guard) => guard,
      Err(e) => {
        warn!(url = %request.url, "Skipping cache write: {:#}", e);
        return;
      }
    };

    if let Err(e) = self.storage.put(&tier.name, &request.key(), response) {
      warn!(tier = %tier.name, url = %request.url, "Cache write failed: {:#}", e);
      return;
    }
    info!(tier = %tier.name, url = %request.url, "Cached");

    if tier.is_bounded() {
      if let Err(e) = enforce_limit(&self.storage, &tier.name, tier.capacity) {
        warn!(tier = %tier.name, "Eviction sweep failed: {:#}", e);
      }
    }
  }
}
