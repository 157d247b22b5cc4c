//! Durable, entity-scoped set of recently deleted ids.
//!
//! Tombstones outlive any single controller, so a row deleted before the
//! user navigates away stays hidden when they come back even if the server
//! still returns it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::cache::storage::{DurableStorage, TOMBSTONE_PREFIX};
use crate::cache::store::now_ms;

/// id → expiry (epoch milliseconds)
type TombstoneSet = HashMap<String, i64>;

pub struct TombstoneStore {
  durable: Arc<dyn DurableStorage>,
  memory: Mutex<HashMap<String, TombstoneSet>>,
}

impl TombstoneStore {
  pub fn new(durable: Arc<dyn DurableStorage>) -> Self {
    Self {
      durable,
      memory: Mutex::new(HashMap::new()),
    }
  }

  /// Hide `id` for `entity` until `ttl` from now.
  pub fn add(&self, entity: &str, id: &str, ttl: Duration) {
    self.add_at(entity, id, ttl, now_ms())
  }

  pub fn add_at(&self, entity: &str, id: &str, ttl: Duration, now: i64) {
    let expires_at = now + ttl.as_millis() as i64;
    self.update(entity, |set| {
      set.insert(id.to_string(), expires_at);
    });
  }

  pub fn is_hidden(&self, entity: &str, id: &str) -> bool {
    self.is_hidden_at(entity, id, now_ms())
  }

  pub fn is_hidden_at(&self, entity: &str, id: &str, now: i64) -> bool {
    self
      .snapshot(entity)
      .get(id)
      .is_some_and(|expires_at| now <= *expires_at)
  }

  pub fn hidden_ids(&self, entity: &str) -> HashSet<String> {
    self.hidden_ids_at(entity, now_ms())
  }

  pub fn hidden_ids_at(&self, entity: &str, now: i64) -> HashSet<String> {
    self
      .snapshot(entity)
      .into_iter()
      .filter(|(_, expires_at)| now <= *expires_at)
      .map(|(id, _)| id)
      .collect()
  }

  /// Purge expired tombstones for `entity`.
  pub fn clear_expired(&self, entity: &str) {
    self.clear_expired_at(entity, now_ms())
  }

  pub fn clear_expired_at(&self, entity: &str, now: i64) {
    self.update(entity, |set| set.retain(|_, expires_at| now <= *expires_at));
  }

  /// Whole-value read of one entity's set, hydrating from storage on first use.
  fn snapshot(&self, entity: &str) -> TombstoneSet {
    let mut memory = self.lock_memory();
    memory
      .entry(entity.to_string())
      .or_insert_with(|| self.load(entity))
      .clone()
  }

  /// Read-modify-replace of one entity's set, then persist it.
  fn update(&self, entity: &str, change: impl FnOnce(&mut TombstoneSet)) {
    let set = {
      let mut memory = self.lock_memory();
      let set = memory
        .entry(entity.to_string())
        .or_insert_with(|| self.load(entity));
      change(set);
      set.clone()
    };
    self.persist(entity, &set);
  }

  fn load(&self, entity: &str) -> TombstoneSet {
    let stored = match self.durable.get(&durable_key(entity)) {
      Ok(Some(stored)) => stored,
      Ok(None) => return TombstoneSet::new(),
      Err(e) => {
        warn!(entity, error = %e, "Tombstone read failed");
        return TombstoneSet::new();
      }
    };

    serde_json::from_str(&stored.value).unwrap_or_else(|e| {
      warn!(entity, error = %e, "Discarding corrupt tombstone set");
      TombstoneSet::new()
    })
  }

  fn persist(&self, entity: &str, set: &TombstoneSet) {
    let key = durable_key(entity);
    let result = if set.is_empty() {
      self.durable.remove(&key)
    } else {
      match serde_json::to_string(set) {
        Ok(raw) => self.durable.put(&key, &raw, set.values().max().copied()),
        Err(e) => {
          warn!(entity, error = %e, "Failed to encode tombstone set");
          return;
        }
      }
    };
    if let Err(e) = result {
      warn!(entity, error = %e, "Tombstone write failed, keeping memory copy only");
    }
  }

  fn lock_memory(&self) -> std::sync::MutexGuard<'_, HashMap<String, TombstoneSet>> {
    self
      .memory
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

fn durable_key(entity: &str) -> String {
  format!("{}{}", TOMBSTONE_PREFIX, entity)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{NoopStorage, SqliteStorage};

  const MINUTE: Duration = Duration::from_secs(60);

  #[test]
  fn test_hidden_until_expiry() {
    let store = TombstoneStore::new(Arc::new(NoopStorage));
    store.add_at("animals", "42", MINUTE, 0);

    assert!(store.is_hidden_at("animals", "42", 60_000));
    assert!(!store.is_hidden_at("animals", "42", 60_001));
    assert!(!store.is_hidden_at("vaccines", "42", 0));
  }

  #[test]
  fn test_survives_new_instance() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    TombstoneStore::new(storage.clone()).add_at("animals", "42", MINUTE, 0);

    let remounted = TombstoneStore::new(storage);
    assert_eq!(
      remounted.hidden_ids_at("animals", 1_000),
      HashSet::from(["42".to_string()])
    );
  }

  #[test]
  fn test_clear_expired_purges_storage() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let store = TombstoneStore::new(storage.clone());
    store.add_at("animals", "1", MINUTE, 0);
    store.add_at("animals", "2", MINUTE * 5, 0);

    store.clear_expired_at("animals", 120_000);

    assert_eq!(
      store.hidden_ids_at("animals", 120_000),
      HashSet::from(["2".to_string()])
    );

    store.clear_expired_at("animals", 600_000);
    assert!(storage
      .keys_with_prefix(TOMBSTONE_PREFIX)
      .unwrap()
      .is_empty());
  }

  #[test]
  fn test_wall_clock_tombstone_hides_until_ttl() {
    let store = TombstoneStore::new(Arc::new(NoopStorage));
    store.add("treatments", "7", MINUTE);
    store.clear_expired("treatments");

    assert!(store.is_hidden("treatments", "7"));
    assert!(!store.is_hidden("treatments", "8"));
    assert_eq!(store.hidden_ids("treatments"), HashSet::from(["7".to_string()]));
    assert!(store.hidden_ids("animals").is_empty());
  }
}
