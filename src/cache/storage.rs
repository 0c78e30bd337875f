//! Cache store trait with SQLite and in-memory backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// A captured response keyed by its request URL.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn new(url: &str, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      url: url.to_string(),
      status,
      headers,
      body,
      cached_at: Utc::now(),
    }
  }
}

/// Trait for cache storage backends.
///
/// Stores are named key-value maps from request URL to captured response.
/// Concurrent writers serialize on the backend; entry order within a store
/// and store creation order are both preserved.
pub trait CacheStorage: Send + Sync {
  /// Create a store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Insert or replace an entry, opening the store if needed.
  fn put(&self, store: &str, entry: &CachedResponse) -> Result<()>;

  /// Look up an entry in a single store.
  fn get(&self, store: &str, url: &str) -> Result<Option<CachedResponse>>;

  /// Look up an entry across all stores, in store creation order.
  fn match_url(&self, url: &str) -> Result<Option<CachedResponse>>;

  /// Names of all stores, in creation order.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Entry URLs of one store, in insertion order.
  fn urls(&self, store: &str) -> Result<Vec<String>>;

  /// Delete a store and its entries. Returns whether the store existed.
  fn delete_store(&self, name: &str) -> Result<bool>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the given path, creating parents as needed.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache stores
CREATE TABLE IF NOT EXISTS stores (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses keyed by store and request URL
CREATE TABLE IF NOT EXISTS entries (
    store_id INTEGER NOT NULL REFERENCES stores(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (store_id, url)
);

CREATE INDEX IF NOT EXISTS idx_entries_url ON entries(url);
"#;

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO stores (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;

    Ok(())
  }

  fn put(&self, store: &str, entry: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO stores (name) VALUES (?)", params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    // Upsert keeps the original rowid, so insertion order survives updates
    conn
      .execute(
        "INSERT INTO entries (store_id, url, status, headers, body, cached_at)
         VALUES ((SELECT id FROM stores WHERE name = ?), ?, ?, ?, ?, ?)
         ON CONFLICT (store_id, url) DO UPDATE SET
           status = excluded.status,
           headers = excluded.headers,
           body = excluded.body,
           cached_at = excluded.cached_at",
        params![
          store,
          entry.url,
          entry.status,
          headers,
          entry.body,
          format_datetime(entry.cached_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", entry.url, e))?;

    Ok(())
  }

  fn get(&self, store: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT e.url, e.status, e.headers, e.body, e.cached_at
         FROM entries e INNER JOIN stores s ON e.store_id = s.id
         WHERE s.name = ? AND e.url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<EntryRow> = stmt.query_row(params![store, url], read_entry_row).ok();
    row.map(entry_from_row).transpose()
  }

  fn match_url(&self, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT e.url, e.status, e.headers, e.body, e.cached_at
         FROM entries e INNER JOIN stores s ON e.store_id = s.id
         WHERE e.url = ?
         ORDER BY s.id
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<EntryRow> = stmt.query_row(params![url], read_entry_row).ok();
    row.map(entry_from_row).transpose()
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn urls(&self, store: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT e.url FROM entries e INNER JOIN stores s ON e.store_id = s.id
         WHERE s.name = ?
         ORDER BY e.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", store, e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(urls)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM entries WHERE store_id IN (SELECT id FROM stores WHERE name = ?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to clear store {}: {}", name, e))?;

    let removed = conn
      .execute("DELETE FROM stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    Ok(removed > 0)
  }
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn read_entry_row(row: &rusqlite::Row) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

fn entry_from_row((url, status, headers, body, cached_at): EntryRow) -> Result<CachedResponse> {
  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse headers: {}", e))?;

  Ok(CachedResponse {
    url,
    status,
    headers,
    body,
    cached_at: parse_datetime(&cached_at)?,
  })
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Storage kept entirely in memory; entries vanish with the process.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<Vec<MemoryStore>>,
}

struct MemoryStore {
  name: String,
  entries: Vec<CachedResponse>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !stores.iter().any(|s| s.name == name) {
      stores.push(MemoryStore {
        name: name.to_string(),
        entries: Vec::new(),
      });
    }

    Ok(())
  }

  fn put(&self, store: &str, entry: &CachedResponse) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let index = match stores.iter().position(|s| s.name == store) {
      Some(index) => index,
      None => {
        stores.push(MemoryStore {
          name: store.to_string(),
          entries: Vec::new(),
        });
        stores.len() - 1
      }
    };

    let slot = &mut stores[index];
    match slot.entries.iter_mut().find(|e| e.url == entry.url) {
      Some(existing) => *existing = entry.clone(),
      None => slot.entries.push(entry.clone()),
    }

    Ok(())
  }

  fn get(&self, store: &str, url: &str) -> Result<Option<CachedResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      stores
        .iter()
        .find(|s| s.name == store)
        .and_then(|s| s.entries.iter().find(|e| e.url == url))
        .cloned(),
    )
  }

  fn match_url(&self, url: &str) -> Result<Option<CachedResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      stores
        .iter()
        .find_map(|s| s.entries.iter().find(|e| e.url == url))
        .cloned(),
    )
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(stores.iter().map(|s| s.name.clone()).collect())
  }

  fn urls(&self, store: &str) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      stores
        .iter()
        .find(|s| s.name == store)
        .map(|s| s.entries.iter().map(|e| e.url.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let before = stores.len();
    stores.retain(|s| s.name != name);
    Ok(stores.len() < before)
  }
}
