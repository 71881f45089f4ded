//! Install and activate entry points.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{info, warn};

use super::engine::PolicyEngine;
use super::eviction::enforce_limit;
use super::power::PowerOracle;
use super::storage::CacheStorage;
use super::types::Request;
use crate::net::Fetcher;

impl<S, F, O> PolicyEngine<S, F, O>
where
  S: CacheStorage,
  F: Fetcher,
  O: PowerOracle,
{
  /// Open every tier and pre-populate the static tier with the bootstrap list.
  ///
  /// All bootstrap URLs are fetched concurrently. If any of them fails or is
  /// not a 200, nothing is written and the install fails.
  pub async fn handle_install(&self) -> Result<usize> {
    let names: Vec<&str> = self.ctx.tiers().into_iter().map(|t| t.name.as_str()).collect();
    self.storage.open_tiers(&names)?;

    let fetches = self.ctx.bootstrap.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = timeout(self.ctx.fetch_timeout, self.fetcher.fetch(&request))
        .await
        .map_err(|_| eyre!("Timed out fetching {}", url))??;

      if !response.is_ok() {
        return Err(eyre!("{} returned HTTP {}", url, response.status));
      }
      Ok::<_, color_eyre::Report>((request.key(), response))
    });

    let entries = join_all(fetches)
      .await
      .into_iter()
      .collect::<Result<Vec<_>>>()
      .map_err(|e| eyre!("Install aborted, nothing was cached: {:#}", e))?;

    let tier = &self.ctx.static_tier;
    let _guard = self.lock_tier(&tier.name).await?;
    self.storage.put_all(&tier.name, &entries)?;
    if tier.is_bounded() {
      enforce_limit(&self.storage, &tier.name, tier.capacity)?;
    }

    info!(tier = %tier.name, count = entries.len(), "Bootstrap resources cached");
    Ok(entries.len())
  }

  /// Drop tiers left behind by earlier generations, then make sure the current
  /// ones exist. Returns the names of the removed tiers.
  pub fn handle_activate(&self) -> Result<Vec<String>> {
    let recognized = self.ctx.recognized_tiers();
    let mut removed = Vec::new();

    for name in self.storage.tier_names()? {
      if recognized.contains(&name.as_str()) {
        continue;
      }
      if self.storage.delete_tier(&name)? {
        info!(tier = %name, "Deleted outdated cache tier");
        removed.push(name);
      } else {
        warn!(tier = %name, "Outdated tier vanished before deletion");
      }
    }

    let names: Vec<&str> = self.ctx.tiers().into_iter().map(|t| t.name.as_str()).collect();
    self.storage.open_tiers(&names)?;

    info!(removed = removed.len(), "Activated");
    Ok(removed)
  }
}
