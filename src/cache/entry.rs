//! Cache entry and subscriber-facing snapshot types.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::api::error::ApiError;

/// A single cached query result.
///
/// Entries are created on first access for a key, refreshed in place on
/// refetch, and removed once `freed_after` elapses with zero subscribers.
/// The cache owns entry storage exclusively; callers only ever see
/// [`QuerySnapshot`]s.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// Last successfully fetched (or optimistically mutated) payload
  pub value: Option<Value>,
  /// When the value was last confirmed by a fetch
  pub fetched_at: Option<DateTime<Utc>>,
  /// How long after `fetched_at` the value counts as fresh
  pub stale_after: Duration,
  /// How long an untouched entry survives with no subscribers
  pub freed_after: Duration,
  /// Error from the most recent failed fetch, cleared on the next success
  pub error: Option<ApiError>,
  /// A fetch for this key is currently in flight
  pub is_loading: bool,
  /// Explicitly invalidated; stale regardless of `fetched_at`
  pub invalidated: bool,
  /// Number of live subscriptions bound to this key
  pub subscribers: usize,
  /// Last access of any kind, used for garbage collection
  pub last_touched: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(stale_after: Duration, freed_after: Duration) -> Self {
    Self {
      value: None,
      fetched_at: None,
      stale_after,
      freed_after,
      error: None,
      is_loading: false,
      invalidated: false,
      subscribers: 0,
      last_touched: Utc::now(),
    }
  }

  /// A value exists and is within its freshness window.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    if self.invalidated || self.value.is_none() {
      return false;
    }
    match self.fetched_at {
      Some(at) => now - at <= self.stale_after,
      None => false,
    }
  }

  /// Eligible for garbage collection: past `freed_after` with no
  /// subscribers and no fetch in flight.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.subscribers == 0 && !self.is_loading && now - self.last_touched > self.freed_after
  }

  /// Snapshot the entry for subscribers.
  pub fn snapshot(&self, now: DateTime<Utc>) -> QuerySnapshot {
    QuerySnapshot {
      data: self.value.clone(),
      error: self.error.clone(),
      is_loading: self.is_loading,
      fetched_at: self.fetched_at,
      is_stale: !self.is_fresh(now),
    }
  }
}

/// The subscriber-facing view of a cache entry.
///
/// A transient fetch error never erases previously fetched data: `data`
/// keeps the last good value while `error` is set (stale-while-error).
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
  pub data: Option<Value>,
  pub error: Option<ApiError>,
  pub is_loading: bool,
  pub fetched_at: Option<DateTime<Utc>>,
  pub is_stale: bool,
}
