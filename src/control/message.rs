//! Typed control contract between pages and the cache manager.

use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheManager, CacheStorage, StoreInfo};
use crate::net::Fetcher;

/// Requests a page may send, tagged exactly as on the wire.
///
/// Unknown tags fail deserialization instead of being silently dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
  /// Force immediate activation.
  SkipWaiting,
  /// Ask for the current version tag.
  GetVersion,
  /// Fan-out cache of a URL list into the dynamic store.
  CacheUrls { urls: Vec<String> },
  /// Remove one store by name.
  DeleteCache {
    #[serde(rename = "cacheName")]
    cache_name: String,
  },
  /// Enumerate stores with entry counts and URLs.
  GetCacheInfo,
}

/// Reply shapes, one per request case.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageReply {
  Ack {
    ok: bool,
  },
  Version {
    version: String,
  },
  Cached {
    cached: usize,
  },
  Deleted {
    deleted: bool,
  },
  CacheInfo {
    #[serde(rename = "cacheInfo")]
    cache_info: Vec<StoreInfo>,
  },
}

/// Run one control message against the manager.
pub async fn dispatch<S: CacheStorage, F: Fetcher>(
  manager: &CacheManager<S, F>,
  message: PageMessage,
) -> Result<MessageReply> {
  match message {
    PageMessage::SkipWaiting => {
      manager.skip_waiting().await?;
      Ok(MessageReply::Ack { ok: true })
    }
    PageMessage::GetVersion => Ok(MessageReply::Version {
      version: manager.version().to_string(),
    }),
    PageMessage::CacheUrls { urls } => Ok(MessageReply::Cached {
      cached: manager.cache_urls(&urls).await,
    }),
    PageMessage::DeleteCache { cache_name } => Ok(MessageReply::Deleted {
      deleted: manager.delete_cache(&cache_name)?,
    }),
    PageMessage::GetCacheInfo => Ok(MessageReply::CacheInfo {
      cache_info: manager.cache_info()?,
    }),
  }
}
