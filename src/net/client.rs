use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

/// Headers that describe the connection rather than the resource and must
/// not be replayed from cache.
const HOP_HEADERS: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "content-length",
];

/// A response pulled from the network.
///
/// Transport failures are errors; HTTP-level failures are responses with a
/// non-ok status, mirroring how strategies treat the two differently.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchedResponse {
  /// Whether the status is in the 2xx range. Only ok responses are cached.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Network fetcher used by the cache manager.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// GET a URL. Returns Err only on transport failure.
  async fn fetch(&self, url: &str) -> Result<FetchedResponse>;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("webstash/", env!("CARGO_PKG_VERSION")))
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// The underlying client, for callers that forward requests verbatim.
  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
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
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(FetchedResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ok_covers_2xx_only() {
    let mut response = FetchedResponse {
      status: 200,
      headers: Vec::new(),
      body: Vec::new(),
    };
    assert!(response.ok());

    response.status = 204;
    assert!(response.ok());

    response.status = 304;
    assert!(!response.ok());

    response.status = 404;
    assert!(!response.ok());
  }
}
