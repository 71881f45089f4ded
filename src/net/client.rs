use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::cache::{CachedResponse, Request};
use crate::config::NetworkConfig;

/// Network boundary of the policy engine.
///
/// Returns `Ok` for any HTTP response, whatever its status; `Err` only when no
/// response was obtained at all.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<CachedResponse>> + Send;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.as_str())
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<CachedResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let response = self
      .client
      .request(method, &request.url)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    debug!(url = %request.url, status, bytes = body.len(), "Fetched");

    Ok(CachedResponse {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
