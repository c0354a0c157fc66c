//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};

/// Trait for cache key types.
///
/// Implementors map a logical resource plus its parameters to a canonical,
/// deterministic key string. Parameters must be normalized (trimmed, ordered)
/// so that equivalent requests always produce the same key.
pub trait QueryKey {
  /// Canonical cache key, e.g. "bills:{}" or "upcoming_bills:{days:7}".
  ///
  /// The key stays human-readable so entries can be matched by resource
  /// prefix for invalidation; hashing happens only in the persistent store.
  fn cache_key(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;

  /// Whether this resource may be written to durable storage.
  ///
  /// Sensitive or volatile resources must return false and are never
  /// persisted across sessions.
  fn persist(&self) -> bool;

  /// Per-resource staleness override. None uses the cache-wide default.
  fn stale_after(&self) -> Option<Duration> {
    None
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched (if from cache)
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, fetched_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      fetched_at: Some(fetched_at),
    }
  }

  /// Create a new cache result for offline mode (network failed, stale data served).
  pub fn offline(data: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      fetched_at: Some(fetched_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale
  CacheStale,
  /// Network unavailable, serving cached data as a fallback
  Offline,
}
