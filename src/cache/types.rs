//! Core types shared by the store, the classifier and the policy engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// URL schemes that never reach the cache.
const EXCLUDED_SCHEMES: &[&str] = &["chrome-extension:", "moz-extension:", "data:"];

/// What the request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Top-level document load (navigation)
  Document,
  /// Anything loaded by a document: scripts, styles, images, API calls
  #[default]
  Subresource,
}

/// An intercepted HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: String,
  pub method: String,
  pub destination: Destination,
}

impl Request {
  pub fn new(method: &str, url: impl Into<String>, destination: Destination) -> Self {
    Self {
      url: url.into(),
      method: method.to_ascii_uppercase(),
      destination,
    }
  }

  /// A GET for a subresource.
  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url, Destination::Subresource)
  }

  /// A GET navigation to a top-level document.
  #[cfg(test)]
  pub fn navigate(url: impl Into<String>) -> Self {
    Self::new("GET", url, Destination::Document)
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  /// Whether the request may be handed to the policy engine at all.
  ///
  /// Only GETs are cacheable, and browser-internal or inline-data URLs are
  /// passed straight through.
  pub fn is_interceptable(&self) -> bool {
    self.method == "GET"
      && !EXCLUDED_SCHEMES
        .iter()
        .any(|scheme| self.url.starts_with(scheme))
  }

  pub fn key(&self) -> RequestKey {
    RequestKey {
      method: self.method.clone(),
      url: self.url.clone(),
    }
  }
}

/// Identity of a cached request within a tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
    }
  }

  /// SHA256 of "METHOD url", used as the fixed-length storage key.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Snapshot of an HTTP response as stored in a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  #[cfg(test)]
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_ok(&self) -> bool {
    self.status == 200
  }
}

/// A stored response together with its position in the tier.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub response: CachedResponse,
  /// Monotonic insertion sequence number; the only eviction signal
  pub inserted_at: u64,
  pub cached_at: DateTime<Utc>,
}

/// Result from the policy engine, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Which stage produced the data
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh network data (possibly a non-200 response when nothing better exists).
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>, source: CacheSource) -> Self {
    Self {
      data,
      source,
      cached_at: Some(cached_at),
    }
  }
}

impl CacheResult<CachedResponse> {
  pub fn from_entry(entry: CacheEntry, source: CacheSource) -> Self {
    Self::from_cache(entry.response, entry.cached_at, source)
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
  /// Straight from the network
  Network,
  /// Cache-first hit for a static resource
  Cache,
  /// Served from cache because the device is offline
  Offline,
  /// Served from cache after the network attempt failed
  Fallback,
  /// Root document substituted for an uncached navigation
  Shell,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Fallback => "fallback",
      Self::Shell => "shell",
    };
    f.write_str(name)
  }
}
