//! Durable storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Prefix shared by every key this application persists.
pub const APP_PREFIX: &str = "herdbook.";
/// Namespace for durable cache entries.
pub const CACHE_PREFIX: &str = "herdbook.cache.";
/// Namespace for tombstone sets.
pub const TOMBSTONE_PREFIX: &str = "herdbook.tombstone.";

/// A value read back from durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
  pub value: String,
  /// Epoch milliseconds, if the writer attached an expiry
  pub expires_at: Option<i64>,
}

/// Trait for durable key/value backends.
///
/// Callers treat every error as "storage unavailable" and fall back to
/// memory, so implementations only need to report failures, not recover.
pub trait DurableStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<StoredValue>>;

  fn put(&self, key: &str, value: &str, expires_at: Option<i64>) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;

  /// List keys starting with `prefix`.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

  /// Remove every key starting with `prefix`, returning how many were removed.
  fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Storage implementation that doesn't persist anything.
/// Used when the durable tier is disabled or unavailable.
pub struct NoopStorage;

impl DurableStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<StoredValue>> {
    Ok(None) // Always miss
  }

  fn put(&self, _key: &str, _value: &str, _expires_at: Option<i64>) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn remove_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based durable storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open storage at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Application data directory (`$XDG_DATA_HOME/herdbook`).
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("herdbook"))
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS durable_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);
"#;

/// Escape `%`, `_` and `\` so a prefix can be used in a LIKE pattern.
fn like_prefix(prefix: &str) -> String {
  let mut escaped = String::with_capacity(prefix.len() + 1);
  for c in prefix.chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped.push('%');
  escaped
}

impl DurableStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<StoredValue>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT value, expires_at FROM durable_kv WHERE key = ?",
        params![key],
        |row| {
          Ok(StoredValue {
            value: row.get(0)?,
            expires_at: row.get(1)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn put(&self, key: &str, value: &str, expires_at: Option<i64>) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO durable_kv (key, value, expires_at) VALUES (?, ?, ?)",
        params![key, value, expires_at],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM durable_kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;

    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT key FROM durable_kv WHERE key LIKE ? ESCAPE '\\' ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key scan: {}", e))?;

    let keys = stmt
      .query_map(params![like_prefix(prefix)], |row| row.get(0))
      .map_err(|e| eyre!("Failed to scan keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM durable_kv WHERE key LIKE ? ESCAPE '\\'",
        params![like_prefix(prefix)],
      )
      .map_err(|e| eyre!("Failed to clear {}: {}", prefix, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_put_get_remove() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("herdbook.cache.a", "1", Some(10)).unwrap();

    assert_eq!(
      storage.get("herdbook.cache.a").unwrap(),
      Some(StoredValue {
        value: "1".to_string(),
        expires_at: Some(10)
      })
    );

    storage.remove("herdbook.cache.a").unwrap();
    assert_eq!(storage.get("herdbook.cache.a").unwrap(), None);
  }

  #[test]
  fn test_prefix_sweep_leaves_foreign_keys() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("herdbook.cache.a", "1", None).unwrap();
    storage.put("herdbook.tombstone.animals", "{}", None).unwrap();
    storage.put("other_app.token", "secret", None).unwrap();

    assert_eq!(storage.remove_prefix(APP_PREFIX).unwrap(), 2);
    assert_eq!(
      storage.keys_with_prefix("").unwrap(),
      vec!["other_app.token".to_string()]
    );
  }

  #[test]
  fn test_prefix_scan_escapes_wildcards() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("herdbook.cache.a_b", "1", None).unwrap();
    storage.put("herdbook.cache.aXb", "2", None).unwrap();

    assert_eq!(
      storage.keys_with_prefix("herdbook.cache.a_").unwrap(),
      vec!["herdbook.cache.a_b".to_string()]
    );
  }
}
