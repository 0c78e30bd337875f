//! Background and periodic sync tags.

use color_eyre::Result;
use tracing::debug;

use crate::cache::{CacheManager, CacheStorage};
use crate::net::Fetcher;

/// Recognized maintenance triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  /// Notify subscribers that a sync ran.
  BackgroundSync,
  /// Refresh the core file set.
  CacheUpdate,
  /// Prune stale-version stores.
  CacheCleanup,
}

impl SyncTag {
  /// Unrecognized tags map to `None` and are ignored by the dispatcher.
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "background-sync" => Some(SyncTag::BackgroundSync),
      "cache-update" => Some(SyncTag::CacheUpdate),
      "cache-cleanup" => Some(SyncTag::CacheCleanup),
      _ => None,
    }
  }
}

/// Run the operation behind a sync tag. Unknown tags are a silent no-op.
pub async fn handle_tag<S: CacheStorage, F: Fetcher>(
  manager: &CacheManager<S, F>,
  tag: &str,
) -> Result<()> {
  match SyncTag::parse(tag) {
    Some(SyncTag::BackgroundSync) => {
      manager.background_sync().await;
    }
    Some(SyncTag::CacheUpdate) => {
      manager.refresh_core().await;
    }
    Some(SyncTag::CacheCleanup) => {
      manager.prune_stale()?;
    }
    None => {
      debug!(tag = %tag, "Ignoring unknown sync tag");
    }
  }
  Ok(())
}
