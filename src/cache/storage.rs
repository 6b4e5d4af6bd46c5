//! Response cache storage: a trait over the persistent backing store plus
//! the SQLite implementation, and the NamedCache wrapper that applies the
//! per-rule expiry and entry-count policies independently of the backend.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::resource::{FetchedResponse, Resource};
use super::rules::StrategyOptions;

/// A cached response together with its storage timestamp.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub response: FetchedResponse,
  pub stored_at: DateTime<Utc>,
}

/// Key-value capability over named caches. Eviction policy lives above this
/// trait, in `NamedCache`.
pub trait CacheStore: Send + Sync {
  fn get(&self, cache: &str, key: &str) -> Result<Option<StoredEntry>>;
  fn put(&self, cache: &str, key: &str, url: &str, response: &FetchedResponse) -> Result<()>;
  fn delete(&self, cache: &str, key: &str) -> Result<()>;
  /// Keys in insertion order, oldest first.
  fn list_keys(&self, cache: &str) -> Result<Vec<String>>;
  fn count(&self, cache: &str) -> Result<usize>;
  fn delete_cache(&self, cache: &str) -> Result<()>;
  fn list_caches(&self) -> Result<Vec<String>>;
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_age
    ON response_cache(cache_name, stored_at);

CREATE TABLE IF NOT EXISTS write_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_write_queue_name ON write_queue(queue_name, id);
"#;

/// SQLite-backed store shared by every named cache and the write queue.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open the store at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open response cache at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// Open an in-memory store (tests).
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.migrate()?;
    Ok(store)
  }

  fn migrate(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    f(&conn)
  }
}

impl CacheStore for SqliteCacheStore {
  fn get(&self, cache: &str, key: &str) -> Result<Option<StoredEntry>> {
    self.with_conn(|conn| {
      let row: Option<(u16, Option<String>, Vec<u8>, String, String)> = conn
        .query_row(
          "SELECT status, content_type, body, fetched_at, stored_at
           FROM response_cache WHERE cache_name = ? AND key = ?",
          params![cache, key],
          |row| {
            Ok((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
            ))
          },
        )
        .optional()
        .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

      let Some((status, content_type, body, fetched_at, stored_at)) = row else {
        return Ok(None);
      };

      Ok(Some(StoredEntry {
        response: FetchedResponse {
          status,
          content_type,
          // Redirects are never cached, so nothing to restore here.
          location: None,
          body,
          fetched_at: parse_datetime(&fetched_at)?,
        },
        stored_at: parse_datetime(&stored_at)?,
      }))
    })
  }

  fn put(&self, cache: &str, key: &str, url: &str, response: &FetchedResponse) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO response_cache
           (cache_name, key, url, status, content_type, body, fetched_at, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
          params![
            cache,
            key,
            url,
            response.status,
            response.content_type,
            response.body,
            response.fetched_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
          ],
        )
        .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;
      Ok(())
    })
  }

  fn delete(&self, cache: &str, key: &str) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute(
          "DELETE FROM response_cache WHERE cache_name = ? AND key = ?",
          params![cache, key],
        )
        .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
      Ok(())
    })
  }

  fn list_keys(&self, cache: &str) -> Result<Vec<String>> {
    self.with_conn(|conn| {
      let mut stmt = conn
        .prepare(
          "SELECT key FROM response_cache WHERE cache_name = ?
           ORDER BY stored_at, rowid",
        )
        .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

      let keys = stmt
        .query_map(params![cache], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
        .filter_map(|r| r.ok())
        .collect();

      Ok(keys)
    })
  }

  fn count(&self, cache: &str) -> Result<usize> {
    self.with_conn(|conn| {
      let count: i64 = conn
        .query_row(
          "SELECT COUNT(*) FROM response_cache WHERE cache_name = ?",
          params![cache],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
      Ok(count as usize)
    })
  }

  fn delete_cache(&self, cache: &str) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute(
          "DELETE FROM response_cache WHERE cache_name = ?",
          params![cache],
        )
        .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;
      Ok(())
    })
  }

  fn list_caches(&self) -> Result<Vec<String>> {
    self.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT DISTINCT cache_name FROM response_cache")
        .map_err(|e| eyre!("Failed to prepare cache listing: {}", e))?;

      let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list caches: {}", e))?
        .filter_map(|r| r.ok())
        .collect();

      Ok(names)
    })
  }
}

/// One persistent key-response mapping, created lazily on first write.
/// Applies the rule's expiry and entry-count limits on top of whatever
/// `CacheStore` backs it.
#[derive(Clone)]
pub struct NamedCache {
  name: String,
  options: StrategyOptions,
  store: Arc<dyn CacheStore>,
}

impl NamedCache {
  pub fn new(name: String, options: StrategyOptions, store: Arc<dyn CacheStore>) -> Self {
    Self {
      name,
      options,
      store,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Read the entry for a resource. Entries past `max_age` read as absent
  /// and are removed opportunistically.
  pub fn lookup(&self, resource: &Resource) -> Result<Option<FetchedResponse>> {
    let key = resource.cache_key();
    let Some(entry) = self.store.get(&self.name, &key)? else {
      return Ok(None);
    };

    if let Some(max_age) = self.options.max_age {
      let age = Utc::now().signed_duration_since(entry.stored_at);
      if age.to_std().map(|a| a > max_age).unwrap_or(false) {
        debug!(cache = %self.name, "Expiring stale cache entry");
        self.store.delete(&self.name, &key)?;
        return Ok(None);
      }
    }

    Ok(Some(entry.response))
  }

  /// Store a response, then trim oldest-first if past the entry cap.
  pub fn put(&self, resource: &Resource, response: &FetchedResponse) -> Result<()> {
    let key = resource.cache_key();
    self
      .store
      .put(&self.name, &key, resource.url.as_str(), response)?;

    if let Some(max_entries) = self.options.max_entries {
      let count = self.store.count(&self.name)?;
      if count > max_entries {
        let keys = self.store.list_keys(&self.name)?;
        for stale in keys.iter().take(count - max_entries) {
          self.store.delete(&self.name, stale)?;
        }
      }
    }

    Ok(())
  }
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::resource::{Destination, Method};
  use std::time::Duration;
  use url::Url;

  fn resource(url: &str) -> Resource {
    Resource {
      url: Url::parse(url).unwrap(),
      method: Method::Get,
      destination: Destination::Other,
      body: None,
    }
  }

  fn response(body: &str) -> FetchedResponse {
    FetchedResponse::new(200, Some("text/plain".into()), body.as_bytes().to_vec())
  }

  fn cache(max_entries: Option<usize>, max_age: Option<Duration>) -> NamedCache {
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    NamedCache::new(
      "litenkod-test-v1".into(),
      StrategyOptions {
        max_entries,
        max_age,
        ..Default::default()
      },
      store,
    )
  }

  #[test]
  fn test_put_then_lookup() {
    let cache = cache(None, None);
    let r = resource("https://litenkod.se/a");
    cache.put(&r, &response("hello")).unwrap();

    let found = cache.lookup(&r).unwrap().unwrap();
    assert_eq!(found.body, b"hello");
    assert_eq!(found.status, 200);
  }

  #[test]
  fn test_lookup_miss() {
    let cache = cache(None, None);
    assert!(cache
      .lookup(&resource("https://litenkod.se/missing"))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_max_entries_evicts_oldest_first() {
    let cache = cache(Some(2), None);
    let a = resource("https://litenkod.se/a");
    let b = resource("https://litenkod.se/b");
    let c = resource("https://litenkod.se/c");

    cache.put(&a, &response("a")).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    cache.put(&b, &response("b")).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    cache.put(&c, &response("c")).unwrap();

    assert!(cache.lookup(&a).unwrap().is_none());
    assert!(cache.lookup(&b).unwrap().is_some());
    assert!(cache.lookup(&c).unwrap().is_some());
  }

  #[test]
  fn test_max_age_lazy_expiry() {
    let cache = cache(None, Some(Duration::from_secs(0)));
    let r = resource("https://litenkod.se/a");
    cache.put(&r, &response("a")).unwrap();
    std::thread::sleep(Duration::from_millis(10));

    assert!(cache.lookup(&r).unwrap().is_none());
    // The expired entry was removed, not just hidden.
    assert_eq!(cache.store.count("litenkod-test-v1").unwrap(), 0);
  }

  #[test]
  fn test_overwrite_same_key_does_not_grow() {
    let cache = cache(Some(2), None);
    let r = resource("https://litenkod.se/a");
    cache.put(&r, &response("one")).unwrap();
    cache.put(&r, &response("two")).unwrap();

    assert_eq!(cache.store.count("litenkod-test-v1").unwrap(), 1);
    assert_eq!(cache.lookup(&r).unwrap().unwrap().body, b"two");
  }

  #[test]
  fn test_delete_cache_and_list_caches() {
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    let a = NamedCache::new(
      "litenkod-a-v1".into(),
      StrategyOptions::default(),
      store.clone(),
    );
    let b = NamedCache::new(
      "litenkod-b-v1".into(),
      StrategyOptions::default(),
      store.clone(),
    );

    a.put(&resource("https://litenkod.se/1"), &response("1"))
      .unwrap();
    b.put(&resource("https://litenkod.se/2"), &response("2"))
      .unwrap();

    let mut caches = store.list_caches().unwrap();
    caches.sort();
    assert_eq!(caches, vec!["litenkod-a-v1", "litenkod-b-v1"]);

    store.delete_cache("litenkod-a-v1").unwrap();
    assert_eq!(store.list_caches().unwrap(), vec!["litenkod-b-v1"]);
  }
}
