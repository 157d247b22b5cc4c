//! Dual-tier cache store: in-memory map backed by durable storage.

use chrono::Utc;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::key::endpoint_pattern;
use super::storage::{DurableStorage, CACHE_PREFIX};

/// Default time-to-live for cache entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// A cached value with its write time and expiry (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  pub timestamp: i64,
  pub expiry: i64,
}

impl<T> CacheEntry<T> {
  pub fn is_expired_at(&self, now: i64) -> bool {
    now > self.expiry
  }

  /// Age of the entry at `now`, in milliseconds.
  pub fn age_at(&self, now: i64) -> i64 {
    now - self.timestamp
  }
}

/// Key → entry cache with TTL expiry and pattern invalidation.
///
/// Durable-tier failures are logged and swallowed; the store then behaves
/// as a memory-only cache.
pub struct CacheStore {
  memory: Mutex<HashMap<String, CacheEntry<Value>>>,
  durable: Arc<dyn DurableStorage>,
  default_ttl: Duration,
}

pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

impl CacheStore {
  pub fn new(durable: Arc<dyn DurableStorage>) -> Self {
    Self {
      memory: Mutex::new(HashMap::new()),
      durable,
      default_ttl: DEFAULT_TTL,
    }
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Get a cached value if it has not expired.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self.get_at(key, now_ms())
  }

  pub fn get_at<T: DeserializeOwned>(&self, key: &str, now: i64) -> Option<T> {
    self.get_entry_at(key, now).map(|entry| entry.data)
  }

  /// Get a cached entry, including its timestamps, if it has not expired.
  pub fn get_entry_at<T: DeserializeOwned>(&self, key: &str, now: i64) -> Option<CacheEntry<T>> {
    let entry = match self.memory_entry(key) {
      Some(entry) => entry,
      None => {
        let entry = self.hydrate(key)?;
        self.lock_memory().insert(key.to_string(), entry.clone());
        entry
      }
    };

    if entry.is_expired_at(now) {
      debug!(key, "Cache entry expired");
      self.invalidate(key);
      return None;
    }

    match serde_json::from_value(entry.data) {
      Ok(data) => Some(CacheEntry {
        data,
        timestamp: entry.timestamp,
        expiry: entry.expiry,
      }),
      Err(e) => {
        warn!(key, error = %e, "Discarding undecodable cache entry");
        self.invalidate(key);
        None
      }
    }
  }

  /// Store a value with the given TTL (or the default TTL).
  pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) {
    self.set_at(key, data, ttl, now_ms())
  }

  pub fn set_at<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>, now: i64) {
    let data = match serde_json::to_value(data) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "Failed to serialize cache value");
        return;
      }
    };

    // Keep expiry strictly after the write time
    let ttl_ms = (ttl.unwrap_or(self.default_ttl).as_millis() as i64).max(1);
    let entry = CacheEntry {
      data,
      timestamp: now,
      expiry: now + ttl_ms,
    };

    match serde_json::to_string(&entry) {
      Ok(raw) => {
        if let Err(e) = self
          .durable
          .put(&durable_key(key), &raw, Some(entry.expiry))
        {
          warn!(key, error = %e, "Durable cache write failed, keeping memory copy only");
        }
      }
      Err(e) => warn!(key, error = %e, "Failed to encode cache entry"),
    }

    self.lock_memory().insert(key.to_string(), entry);
  }

  /// Remove a key from both tiers. Removing a missing key is a no-op.
  pub fn invalidate(&self, key: &str) {
    self.lock_memory().remove(key);
    if let Err(e) = self.durable.remove(&durable_key(key)) {
      warn!(key, error = %e, "Durable cache remove failed");
    }
  }

  /// Remove every key matching `pattern` from both tiers.
  pub fn invalidate_by_pattern(&self, pattern: &Regex) {
    let removed = {
      let mut memory = self.lock_memory();
      let before = memory.len();
      memory.retain(|key, _| !pattern.is_match(key));
      before - memory.len()
    };

    let durable_keys = match self.durable.keys_with_prefix(CACHE_PREFIX) {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Durable cache scan failed");
        Vec::new()
      }
    };

    for durable in durable_keys {
      let key = &durable[CACHE_PREFIX.len()..];
      if pattern.is_match(key) {
        if let Err(e) = self.durable.remove(&durable) {
          warn!(key, error = %e, "Durable cache remove failed");
        }
      }
    }

    debug!(pattern = pattern.as_str(), removed, "Invalidated cache by pattern");
  }

  /// Remove every key generated for `endpoint` under `base`, whatever its params.
  pub fn invalidate_by_endpoint(&self, base: &str, endpoint: &str) {
    match endpoint_pattern(base, endpoint) {
      Ok(pattern) => self.invalidate_by_pattern(&pattern),
      Err(e) => warn!(endpoint, error = %e, "Could not build invalidation pattern"),
    }
  }

  /// Wipe every cache entry.
  pub fn clear(&self) {
    self.lock_memory().clear();
    if let Err(e) = self.durable.remove_prefix(CACHE_PREFIX) {
      warn!(error = %e, "Durable cache clear failed");
    }
  }

  fn memory_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
    self.lock_memory().get(key).cloned()
  }

  fn hydrate(&self, key: &str) -> Option<CacheEntry<Value>> {
    let stored = match self.durable.get(&durable_key(key)) {
      Ok(stored) => stored?,
      Err(e) => {
        warn!(key, error = %e, "Durable cache read failed");
        return None;
      }
    };

    match serde_json::from_str(&stored.value) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, error = %e, "Discarding corrupt durable cache entry");
        let _ = self.durable.remove(&durable_key(key));
        None
      }
    }
  }

  fn lock_memory(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<Value>>> {
    // A panic while holding the lock leaves a plain map behind; keep using it
    self
      .memory
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

fn durable_key(key: &str) -> String {
  format!("{}{}", CACHE_PREFIX, key)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{NoopStorage, SqliteStorage, StoredValue};
  use color_eyre::eyre::eyre;

  fn sqlite_store() -> (CacheStore, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    (CacheStore::new(storage.clone()), storage)
  }

  struct FailingStorage;

  impl DurableStorage for FailingStorage {
    fn get(&self, _key: &str) -> color_eyre::Result<Option<StoredValue>> {
      Err(eyre!("storage disabled"))
    }
    fn put(&self, _key: &str, _value: &str, _expires_at: Option<i64>) -> color_eyre::Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn remove(&self, _key: &str) -> color_eyre::Result<()> {
      Err(eyre!("storage disabled"))
    }
    fn keys_with_prefix(&self, _prefix: &str) -> color_eyre::Result<Vec<String>> {
      Err(eyre!("storage disabled"))
    }
    fn remove_prefix(&self, _prefix: &str) -> color_eyre::Result<usize> {
      Err(eyre!("storage disabled"))
    }
  }

  #[test]
  fn test_get_respects_expiry() {
    let (store, _) = sqlite_store();
    store.set_at("k", &vec![1, 2], Some(Duration::from_secs(10)), 1_000);

    assert_eq!(store.get_at::<Vec<i32>>("k", 11_000), Some(vec![1, 2]));
    assert_eq!(store.get_at::<Vec<i32>>("k", 11_001), None);
    // Expired entries are evicted, not just hidden
    assert_eq!(store.get_at::<Vec<i32>>("k", 1_000), None);
  }

  #[test]
  fn test_default_ttl_is_five_minutes() {
    let store = CacheStore::new(Arc::new(NoopStorage));
    store.set_at("k", &"v", None, 0);

    let entry = store.get_entry_at::<String>("k", 0).unwrap();
    assert_eq!(entry.expiry, 300_000);
    assert!(entry.expiry > entry.timestamp);
  }

  #[test]
  fn test_hydrates_from_durable_tier() {
    let (store, storage) = sqlite_store();
    let now = now_ms();
    store.set_at("api/animals", &vec!["a"], None, now);

    let fresh = CacheStore::new(storage);
    assert_eq!(
      fresh.get_at::<Vec<String>>("api/animals", now + 1),
      Some(vec!["a".to_string()])
    );
  }

  #[test]
  fn test_invalidate_is_idempotent() {
    let (store, storage) = sqlite_store();
    store.set_at("k", &1, None, 0);

    store.invalidate("k");
    store.invalidate("k");

    assert_eq!(store.get_at::<i32>("k", 0), None);
    assert!(storage.keys_with_prefix(CACHE_PREFIX).unwrap().is_empty());
  }

  #[test]
  fn test_invalidate_by_endpoint_spares_other_resources() {
    let (store, storage) = sqlite_store();
    store.set_at("api/animals", &1, None, 0);
    store.set_at("api/animals:eyJwYWdlIjoxfQ==", &2, None, 0);
    store.set_at("api/animals/7", &3, None, 0);
    store.set_at("api/vaccines", &4, None, 0);

    store.invalidate_by_endpoint("api", "animals");

    assert_eq!(store.get_at::<i32>("api/animals", 0), None);
    assert_eq!(store.get_at::<i32>("api/animals:eyJwYWdlIjoxfQ==", 0), None);
    assert_eq!(store.get_at::<i32>("api/animals/7", 0), None);
    assert_eq!(store.get_at::<i32>("api/vaccines", 0), Some(4));
    assert_eq!(
      storage.keys_with_prefix(CACHE_PREFIX).unwrap(),
      vec!["herdbook.cache.api/vaccines".to_string()]
    );
  }

  #[test]
  fn test_clear_wipes_everything() {
    let (store, storage) = sqlite_store();
    store.set_at("a", &1, None, 0);
    store.set_at("b", &2, None, 0);

    store.clear();

    assert_eq!(store.get_at::<i32>("a", 0), None);
    assert!(storage.keys_with_prefix(CACHE_PREFIX).unwrap().is_empty());
  }

  #[test]
  fn test_storage_failures_degrade_to_memory() {
    let store = CacheStore::new(Arc::new(FailingStorage));
    store.set_at("k", &"kept", None, 0);

    assert_eq!(store.get_at::<String>("k", 1), Some("kept".to_string()));
    store.invalidate("k");
    store.clear();
    assert_eq!(store.get_at::<String>("k", 1), None);
  }
}
