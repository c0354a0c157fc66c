//! Persistent store trait and SQLite implementation.
//!
//! The in-memory cache is the source of truth; the persistent store is a
//! write-behind copy of persistence-eligible entries so reads survive a
//! restart. Resources marked non-persistent never reach this layer.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Mutex;

/// A value loaded back from durable storage.
#[derive(Debug, Clone)]
pub struct PersistedEntry {
  pub value: Value,
  pub fetched_at: DateTime<Utc>,
}

/// Trait for durable cache storage backends.
pub trait PersistentStore: Send + Sync {
  /// Load the persisted value for a key, if any.
  fn load(&self, key: &str) -> Result<Option<PersistedEntry>>;

  /// Store (or replace) the value for a key.
  fn store(&self, key: &str, value: &Value, fetched_at: DateTime<Utc>) -> Result<()>;

  /// Remove the persisted value for a key. Missing keys are not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// Drop everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when the disk cache is disabled - all operations are no-ops.
pub struct NoopStore;

impl PersistentStore for NoopStore {
  fn load(&self, _key: &str) -> Result<Option<PersistedEntry>> {
    Ok(None) // Always miss
  }

  fn store(&self, _key: &str, _value: &Value, _fetched_at: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based persistent store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the given path, or the default location.
  pub fn open(path: Option<PathBuf>) -> Result<Self> {
    let path = match path {
      Some(p) => p,
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory SQLite database, for tests.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory db: {}", e))?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tally").join("cache.db"))
  }

  /// Run database migrations for the cache table.
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

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
-- Persisted query results (serialized JSON payloads)
CREATE TABLE IF NOT EXISTS query_cache (
    key_hash TEXT PRIMARY KEY,
    key TEXT NOT NULL,
    data BLOB NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

/// SHA256 hash of the canonical key, for stable fixed-length storage keys.
fn hash_key(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

impl PersistentStore for SqliteStore {
  fn load(&self, key: &str) -> Result<Option<PersistedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data, fetched_at FROM query_cache WHERE key_hash = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![hash_key(key)], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    match row {
      Some((data, fetched_at_str)) => {
        let value: Value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached value: {}", e))?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at_str)
          .map_err(|e| eyre!("Failed to parse datetime '{}': {}", fetched_at_str, e))?
          .with_timezone(&Utc);
        Ok(Some(PersistedEntry { value, fetched_at }))
      }
      None => Ok(None),
    }
  }

  fn store(&self, key: &str, value: &Value, fetched_at: DateTime<Utc>) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (key_hash, key, data, fetched_at)
         VALUES (?, ?, ?, ?)",
        params![hash_key(key), key, data, fetched_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store cached value: {}", e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM query_cache WHERE key_hash = ?",
        params![hash_key(key)],
      )
      .map_err(|e| eyre!("Failed to remove cached value: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}
