//! Named, versioned cache stores and the strategies that serve from them.
//!
//! This module provides the offline cache manager:
//! - Persistent stores keyed by request URL, named after the version tag
//! - Cache-first and network-first resolution with tiered offline fallback
//! - Lifecycle (install, activate, prune) and batch maintenance operations

mod manager;
mod storage;

pub use manager::{CacheManager, Lifecycle, Served, ServedSource, StoreInfo};
pub use storage::{CacheStorage, CachedResponse, MemoryStorage, SqliteStorage};
