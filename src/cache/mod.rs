//! Offline-first HTTP resource cache.
//!
//! This module holds the request policy engine and everything it drives:
//! - Classifies URLs as static (cache-first) or dynamic (network-first)
//! - Stores responses in named tiers that remember insertion order
//! - Bounds tiers by entry count, evicting the oldest insertions first
//! - Restricts admission to essential resources when battery is low
//! - Serves cached data or the application shell when the network is gone

mod classify;
mod context;
mod engine;
mod eviction;
mod lifecycle;
mod power;
mod storage;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use context::PolicyContext;
pub use engine::PolicyEngine;
pub use eviction::EvictionReport;
pub use power::{PowerOracle, SysfsOracle};
pub use storage::{CacheStorage, SqliteStorage};
pub use types::{CacheResult, CacheSource, CachedResponse, Destination, Request};

#[cfg(test)]
pub(crate) use power::PowerState;
#[cfg(test)]
pub(crate) use types::RequestKey;
