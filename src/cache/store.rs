//! Query cache that orchestrates fetching, de-duplication and staleness.
//!
//! The cache is the single client-side source of truth for server-derived
//! data. It is an explicitly constructed object (no ambient singleton),
//! cheap to clone, and injected into the resource layer. All mutation goes
//! through `fetch`/`invalidate`/`mutate`; nothing writes entries directly.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::entry::{CacheEntry, QuerySnapshot};
use super::storage::PersistentStore;
use super::traits::{CacheResult, QueryKey};
use crate::api::error::ApiError;

type FetchOutcome = Result<Value, ApiError>;

/// Cache-wide defaults and retry policy.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
  /// How long before cached data is considered stale
  pub stale_after: Duration,
  /// How long an entry with no subscribers survives before collection
  pub freed_after: Duration,
  /// Total fetch attempts before the error is surfaced
  pub retry_attempts: u32,
  /// Delay before the first retry; doubles per attempt
  pub retry_base_delay: std::time::Duration,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self {
      stale_after: Duration::minutes(5),
      freed_after: Duration::minutes(30),
      retry_attempts: 3,
      retry_base_delay: std::time::Duration::from_millis(250),
    }
  }
}

struct Inner {
  entries: HashMap<String, CacheEntry>,
  /// One broadcast channel per key with a fetch in flight. Concurrent
  /// callers subscribe to it instead of issuing their own network call.
  in_flight: HashMap<String, broadcast::Sender<FetchOutcome>>,
  watchers: HashMap<String, watch::Sender<QuerySnapshot>>,
}

/// Process-wide in-memory query cache with durable write-behind.
pub struct QueryCache {
  inner: Arc<Mutex<Inner>>,
  store: Arc<dyn PersistentStore>,
  policy: CachePolicy,
}

impl Clone for QueryCache {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      store: Arc::clone(&self.store),
      policy: self.policy,
    }
  }
}

impl QueryCache {
  /// Create a cache with default policy over the given durable store.
  pub fn new(store: Arc<dyn PersistentStore>) -> Self {
    Self::with_policy(store, CachePolicy::default())
  }

  pub fn with_policy(store: Arc<dyn PersistentStore>, policy: CachePolicy) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        entries: HashMap::new(),
        in_flight: HashMap::new(),
        watchers: HashMap::new(),
      })),
      store,
      policy,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    // A poisoned lock only means another thread panicked mid-update;
    // the entry data itself is still structurally valid.
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Current state for a key without triggering a fetch.
  pub fn get(&self, key: &impl QueryKey) -> Option<QuerySnapshot> {
    let mut inner = self.lock();
    let now = Utc::now();
    inner.entries.get_mut(&key.cache_key()).map(|entry| {
      entry.last_touched = now;
      entry.snapshot(now)
    })
  }

  /// Fetch a value with cache-first strategy and request de-duplication.
  ///
  /// 1. Fresh entry: returned immediately, no network call.
  /// 2. Fetch already in flight for this key: await the same result.
  /// 3. Otherwise run the fetcher (with bounded retry), store the result,
  ///    and notify subscribers.
  ///
  /// A failed fetch never erases a previously cached value: the error is
  /// recorded on the entry and, if stale data exists, the call resolves to
  /// it (`CacheSource::Offline`).
  pub async fn fetch<K, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<Value>, ApiError>
  where
    K: QueryKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchOutcome> + Send + 'static,
  {
    let cache_key = key.cache_key();
    let stale_after = key.stale_after().unwrap_or(self.policy.stale_after);

    if key.persist() {
      self.hydrate(&cache_key, stale_after);
    }

    let (rx, stale) = {
      let mut inner = self.lock();
      let now = Utc::now();
      let freed_after = self.policy.freed_after;

      {
        let entry = inner
          .entries
          .entry(cache_key.clone())
          .or_insert_with(|| CacheEntry::new(stale_after, freed_after));
        entry.stale_after = stale_after;
        entry.last_touched = now;

        if entry.is_fresh(now) {
          if let (Some(value), Some(at)) = (entry.value.clone(), entry.fetched_at) {
            return Ok(CacheResult::from_cache(value, at, false));
          }
        }
      }

      let stale = inner
        .entries
        .get(&cache_key)
        .and_then(|e| e.value.clone().zip(e.fetched_at));

      let rx = match inner.in_flight.get(&cache_key) {
        // Subscribing under the lock guarantees we cannot miss the send:
        // the fetch task needs this lock before it broadcasts.
        Some(tx) => tx.subscribe(),
        None => {
          debug!("fetching {} ({})", cache_key, key.description());
          let (tx, rx) = broadcast::channel(1);
          inner.in_flight.insert(cache_key.clone(), tx.clone());
          if let Some(entry) = inner.entries.get_mut(&cache_key) {
            entry.is_loading = true;
          }
          Self::notify(&inner, &cache_key);
          self.spawn_fetch(cache_key.clone(), key.persist(), tx, fetcher);
          rx
        }
      };
      (rx, stale)
    };

    Self::await_outcome(rx, stale).await
  }

  /// Run the fetch on its own task so it completes into the shared cache
  /// even if the caller that initiated it goes away.
  fn spawn_fetch<F, Fut>(
    &self,
    cache_key: String,
    persist: bool,
    tx: broadcast::Sender<FetchOutcome>,
    fetcher: F,
  ) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchOutcome> + Send + 'static,
  {
    let cache = self.clone();
    tokio::spawn(async move {
      let outcome = retry_fetch(
        &fetcher,
        cache.policy.retry_attempts,
        cache.policy.retry_base_delay,
      )
      .await;
      let completed_at = Utc::now();

      {
        let mut inner = cache.lock();
        inner.in_flight.remove(&cache_key);
        if let Some(entry) = inner.entries.get_mut(&cache_key) {
          entry.is_loading = false;
          entry.last_touched = completed_at;
          match &outcome {
            Ok(value) => {
              entry.value = Some(value.clone());
              entry.fetched_at = Some(completed_at);
              entry.error = None;
              entry.invalidated = false;
            }
            Err(err) => {
              // Previous value stays visible (stale-while-error).
              entry.error = Some(err.clone());
            }
          }
        }
        Self::notify(&inner, &cache_key);
      }

      match &outcome {
        Ok(value) => {
          debug!("fetched {}", cache_key);
          if persist {
            if let Err(e) = cache.store.store(&cache_key, value, completed_at) {
              warn!("failed to persist {}: {}", cache_key, e);
            }
          }
        }
        Err(err) => warn!("fetch failed for {}: {}", cache_key, err),
      }

      // Receivers may all be gone; the cache update above already happened.
      let _ = tx.send(outcome);
    });
  }

  async fn await_outcome(
    mut rx: broadcast::Receiver<FetchOutcome>,
    stale: Option<(Value, DateTime<Utc>)>,
  ) -> Result<CacheResult<Value>, ApiError> {
    match rx.recv().await {
      Ok(Ok(value)) => Ok(CacheResult::from_network(value)),
      Ok(Err(err)) => match stale {
        Some((value, at)) => Ok(CacheResult::offline(value, at)),
        None => Err(err),
      },
      // Sender dropped without a result: fetch task was aborted.
      Err(_) => match stale {
        Some((value, at)) => Ok(CacheResult::from_cache(value, at, true)),
        None => Err(ApiError::Network("fetch was cancelled".to_string())),
      },
    }
  }

  /// Read a key from cache only, without permitting a fetch.
  ///
  /// Stale data is returned as such; a key with no value at all is a
  /// [`ApiError::CacheMiss`].
  pub fn read_cached(&self, key: &impl QueryKey) -> Result<CacheResult<Value>, ApiError> {
    let cache_key = key.cache_key();
    let stale_after = key.stale_after().unwrap_or(self.policy.stale_after);
    if key.persist() {
      self.hydrate(&cache_key, stale_after);
    }

    let mut inner = self.lock();
    let now = Utc::now();
    match inner.entries.get_mut(&cache_key) {
      Some(entry) => {
        entry.last_touched = now;
        match (entry.value.clone(), entry.fetched_at) {
          (Some(value), Some(at)) => {
            let is_stale = !entry.is_fresh(now);
            Ok(CacheResult::from_cache(value, at, is_stale))
          }
          _ => Err(ApiError::CacheMiss),
        }
      }
      None => Err(ApiError::CacheMiss),
    }
  }

  /// Mark one key stale. The refetch happens on next access.
  pub fn invalidate(&self, key: &impl QueryKey) {
    self.invalidate_key(&key.cache_key());
  }

  /// Mark every entry of a resource stale (all parameter variants).
  pub fn invalidate_resource(&self, resource: &str) {
    let prefix = format!("{}:", resource);
    self.invalidate_where(|key| key.starts_with(&prefix));
  }

  /// Mark all entries whose canonical key matches the predicate stale.
  pub fn invalidate_where(&self, predicate: impl Fn(&str) -> bool) {
    let matching: Vec<String> = {
      let inner = self.lock();
      inner
        .entries
        .keys()
        .filter(|k| predicate(k))
        .cloned()
        .collect()
    };
    for key in matching {
      self.invalidate_key(&key);
    }
  }

  fn invalidate_key(&self, cache_key: &str) {
    {
      let mut inner = self.lock();
      let hit = match inner.entries.get_mut(cache_key) {
        Some(entry) => {
          entry.invalidated = true;
          true
        }
        None => false,
      };
      if !hit {
        return;
      }
      Self::notify(&inner, cache_key);
    }
    debug!("invalidated {}", cache_key);
    // Drop the durable copy too, so stale data is not rehydrated later.
    if let Err(e) = self.store.remove(cache_key) {
      warn!("failed to remove persisted {}: {}", cache_key, e);
    }
  }

  /// Apply a local optimistic update to a cached value.
  ///
  /// Returns the previous value so a failed server mutation can roll back
  /// via [`restore`](Self::restore). The update is reconciled (overwritten)
  /// by the next real fetch. Entries without a value are left untouched.
  pub fn mutate(&self, key: &impl QueryKey, updater: impl FnOnce(&mut Value)) -> Option<Value> {
    let cache_key = key.cache_key();
    let mut inner = self.lock();
    let previous = match inner.entries.get_mut(&cache_key) {
      Some(entry) => match entry.value.as_mut() {
        Some(value) => {
          let previous = value.clone();
          updater(value);
          entry.last_touched = Utc::now();
          Some(previous)
        }
        None => None,
      },
      None => None,
    };
    if previous.is_some() {
      Self::notify(&inner, &cache_key);
    }
    previous
  }

  /// Put back a value captured before an optimistic update.
  pub fn restore(&self, key: &impl QueryKey, value: Value) {
    let cache_key = key.cache_key();
    let mut inner = self.lock();
    if let Some(entry) = inner.entries.get_mut(&cache_key) {
      entry.value = Some(value);
      entry.last_touched = Utc::now();
    }
    Self::notify(&inner, &cache_key);
  }

  /// Bind a live subscription to a key.
  ///
  /// The subscription shares the key's entry and in-flight fetch with every
  /// other subscriber. Dropping it stops delivery immediately; a fetch that
  /// is still in flight completes into the cache for the others.
  pub fn subscribe(&self, key: &impl QueryKey) -> QuerySubscription {
    let cache_key = key.cache_key();
    let stale_after = key.stale_after().unwrap_or(self.policy.stale_after);
    let freed_after = self.policy.freed_after;

    let mut inner = self.lock();
    let now = Utc::now();
    let snapshot = {
      let entry = inner
        .entries
        .entry(cache_key.clone())
        .or_insert_with(|| CacheEntry::new(stale_after, freed_after));
      entry.subscribers += 1;
      entry.last_touched = now;
      entry.snapshot(now)
    };

    let rx = match inner.watchers.get(&cache_key) {
      Some(tx) => tx.subscribe(),
      None => {
        let (tx, rx) = watch::channel(snapshot);
        inner.watchers.insert(cache_key.clone(), tx);
        rx
      }
    };

    QuerySubscription {
      cache_key,
      inner: Arc::clone(&self.inner),
      rx,
    }
  }

  /// Drop every entry, in memory and on disk. Fetches still in flight
  /// complete into fresh entries.
  pub fn clear(&self) {
    {
      let mut inner = self.lock();
      inner.entries.clear();
      inner.in_flight.clear();
      inner.watchers.clear();
    }
    if let Err(e) = self.store.clear() {
      warn!("failed to clear cache db: {}", e);
    }
  }

  /// Remove entries past `freed_after` with zero subscribers.
  /// Returns the number of entries removed.
  pub fn sweep(&self) -> usize {
    let mut inner = self.lock();
    let now = Utc::now();
    let expired: Vec<String> = inner
      .entries
      .iter()
      .filter(|(_, entry)| entry.is_expired(now))
      .map(|(key, _)| key.clone())
      .collect();
    for key in &expired {
      inner.entries.remove(key);
      inner.watchers.remove(key);
    }
    expired.len()
  }

  /// Spawn a background task that sweeps expired entries on an interval.
  /// Abort the returned handle during shutdown.
  pub fn spawn_sweeper(&self, interval: std::time::Duration) -> JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(interval).await;
        let removed = cache.sweep();
        if removed > 0 {
          debug!("sweeper removed {} expired entries", removed);
        }
      }
    })
  }

  /// Seed an entry from durable storage if memory has nothing for the key.
  fn hydrate(&self, cache_key: &str, stale_after: Duration) {
    {
      let inner = self.lock();
      let has_value = inner
        .entries
        .get(cache_key)
        .map(|e| e.value.is_some())
        .unwrap_or(false);
      if has_value {
        return;
      }
    }

    let persisted = match self.store.load(cache_key) {
      Ok(Some(p)) => p,
      Ok(None) => return,
      Err(e) => {
        warn!("failed to read cache db for {}: {}", cache_key, e);
        return;
      }
    };

    let mut inner = self.lock();
    let freed_after = self.policy.freed_after;
    let entry = inner
      .entries
      .entry(cache_key.to_string())
      .or_insert_with(|| CacheEntry::new(stale_after, freed_after));
    if entry.value.is_none() {
      entry.value = Some(persisted.value);
      entry.fetched_at = Some(persisted.fetched_at);
      debug!("hydrated {} from disk", cache_key);
    }
  }

  fn notify(inner: &Inner, cache_key: &str) {
    let now = Utc::now();
    let snapshot = match inner.entries.get(cache_key) {
      Some(entry) => entry.snapshot(now),
      None => return,
    };
    if let Some(tx) = inner.watchers.get(cache_key) {
      tx.send_replace(snapshot);
    }
  }
}

/// A live component binding to one cache key.
pub struct QuerySubscription {
  cache_key: String,
  inner: Arc<Mutex<Inner>>,
  rx: watch::Receiver<QuerySnapshot>,
}

impl QuerySubscription {
  /// The most recent snapshot for the key.
  pub fn snapshot(&self) -> QuerySnapshot {
    self.rx.borrow().clone()
  }

  /// Wait until the snapshot changes. Returns false if the cache was
  /// torn down.
  pub async fn changed(&mut self) -> bool {
    self.rx.changed().await.is_ok()
  }

  pub fn key(&self) -> &str {
    &self.cache_key
  }
}

impl Drop for QuerySubscription {
  fn drop(&mut self) {
    let mut inner = match self.inner.lock() {
      Ok(inner) => inner,
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(entry) = inner.entries.get_mut(&self.cache_key) {
      entry.subscribers = entry.subscribers.saturating_sub(1);
      entry.last_touched = Utc::now();
    }
  }
}

/// Invoke the fetcher with bounded retry and exponential backoff.
/// Non-retryable errors surface immediately.
async fn retry_fetch<F, Fut>(
  fetcher: &F,
  attempts: u32,
  base_delay: std::time::Duration,
) -> FetchOutcome
where
  F: Fn() -> Fut,
  Fut: Future<Output = FetchOutcome>,
{
  let mut delay = base_delay;
  let mut attempt = 1u32;
  loop {
    match fetcher().await {
      Ok(value) => return Ok(value),
      Err(err) => {
        if !err.is_retryable() || attempt >= attempts.max(1) {
          return Err(err);
        }
        debug!(
          "fetch attempt {}/{} failed, retrying in {:?}: {}",
          attempt, attempts, delay, err
        );
        tokio::time::sleep(delay).await;
        delay *= 2;
        attempt += 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{NoopStore, SqliteStore};
  use crate::cache::traits::CacheSource;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

  struct TestKey {
    key: &'static str,
    persist: bool,
    stale_after: Option<Duration>,
  }

  impl QueryKey for TestKey {
    fn cache_key(&self) -> String {
      self.key.to_string()
    }

    fn description(&self) -> String {
      self.key.to_string()
    }

    fn persist(&self) -> bool {
      self.persist
    }

    fn stale_after(&self) -> Option<Duration> {
      self.stale_after
    }
  }

  fn key(key: &'static str) -> TestKey {
    TestKey {
      key,
      persist: false,
      stale_after: None,
    }
  }

  fn test_cache() -> QueryCache {
    QueryCache::with_policy(
      Arc::new(NoopStore),
      CachePolicy {
        retry_base_delay: std::time::Duration::from_millis(1),
        ..CachePolicy::default()
      },
    )
  }

  /// Fetcher that counts invocations and returns a fixed payload.
  fn counting_fetcher(
    counter: Arc<AtomicU32>,
    payload: Value,
  ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = FetchOutcome> + Send>> + Send + Sync + 'static
  {
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      let payload = payload.clone();
      Box::pin(async move { Ok(payload) })
    }
  }

  #[tokio::test]
  async fn test_concurrent_fetches_share_one_network_call() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let fetches = (0..5).map(|_| {
      let cache = cache.clone();
      let calls = calls.clone();
      async move {
        cache
          .fetch(&key("bills:{}"), move || {
            let calls = calls.clone();
            async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(std::time::Duration::from_millis(20)).await;
              Ok(json!([{"id": 1}]))
            }
          })
          .await
      }
    });

    let results = futures::future::join_all(fetches).await;
    for result in results {
      assert_eq!(result.unwrap().data, json!([{"id": 1}]));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fresh_entry_served_without_network() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(calls.clone(), json!([1, 2]));

    let first = cache.fetch(&key("bills:{}"), fetcher).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let fetcher = counting_fetcher(calls.clone(), json!([1, 2]));
    let second = cache.fetch(&key("bills:{}"), fetcher).await.unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, json!([1, 2]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_entry_triggers_refetch() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));
    let stale_key = TestKey {
      key: "rates:{base:USD}",
      persist: false,
      stale_after: Some(Duration::zero()),
    };

    let fetcher = counting_fetcher(calls.clone(), json!({"USD": 1.0}));
    cache.fetch(&stale_key, fetcher).await.unwrap();

    let fetcher = counting_fetcher(calls.clone(), json!({"USD": 1.0}));
    cache.fetch(&stale_key, fetcher).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_is_key_scoped() {
    let cache = test_cache();
    let bills_calls = Arc::new(AtomicU32::new(0));
    let budgets_calls = Arc::new(AtomicU32::new(0));

    let fetcher = counting_fetcher(bills_calls.clone(), json!([]));
    cache.fetch(&key("bills:{}"), fetcher).await.unwrap();
    let fetcher = counting_fetcher(budgets_calls.clone(), json!([]));
    cache.fetch(&key("budgets:{month:2026-08}"), fetcher).await.unwrap();

    cache.invalidate(&key("bills:{}"));

    let fetcher = counting_fetcher(bills_calls.clone(), json!([]));
    cache.fetch(&key("bills:{}"), fetcher).await.unwrap();
    let fetcher = counting_fetcher(budgets_calls.clone(), json!([]));
    cache.fetch(&key("budgets:{month:2026-08}"), fetcher).await.unwrap();

    // Invalidated key refetched; the unrelated key did not.
    assert_eq!(bills_calls.load(Ordering::SeqCst), 2);
    assert_eq!(budgets_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidate_resource_matches_all_parameter_variants() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));

    for k in ["upcoming_bills:{days:7}", "upcoming_bills:{days:30}"] {
      let fetcher = counting_fetcher(calls.clone(), json!([]));
      cache.fetch(&key(k), fetcher).await.unwrap();
    }
    cache.invalidate_resource("upcoming_bills");

    assert!(cache.get(&key("upcoming_bills:{days:7}")).unwrap().is_stale);
    assert!(cache.get(&key("upcoming_bills:{days:30}")).unwrap().is_stale);
  }

  #[tokio::test]
  async fn test_invalidated_key_refetches_once_for_concurrent_readers() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let fetcher = counting_fetcher(calls.clone(), json!([]));
    cache.fetch(&key("bills:{}"), fetcher).await.unwrap();
    cache.invalidate(&key("bills:{}"));

    let fetches = (0..3).map(|_| {
      let cache = cache.clone();
      let calls = calls.clone();
      async move {
        cache
          .fetch(&key("bills:{}"), move || {
            let calls = calls.clone();
            async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(std::time::Duration::from_millis(10)).await;
              Ok(json!([]))
            }
          })
          .await
      }
    });
    futures::future::join_all(fetches).await;

    // One refetch for the invalidated key, not one per reader.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failed_fetch_keeps_previous_value() {
    let cache = test_cache();
    let should_fail = Arc::new(AtomicBool::new(false));
    let stale_key = TestKey {
      key: "bills:{}",
      persist: false,
      stale_after: Some(Duration::zero()),
    };

    let flag = should_fail.clone();
    let fetcher = move || {
      let fail = flag.load(Ordering::SeqCst);
      async move {
        if fail {
          Err(ApiError::Http {
            status: 500,
            body: "boom".to_string(),
          })
        } else {
          Ok(json!([{"id": 42}]))
        }
      }
    };

    let first = cache.fetch(&stale_key, fetcher.clone()).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);

    should_fail.store(true, Ordering::SeqCst);
    let second = cache.fetch(&stale_key, fetcher).await.unwrap();
    // Previous data served in offline mode
    assert_eq!(second.source, CacheSource::Offline);
    assert_eq!(second.data, json!([{"id": 42}]));

    let snapshot = cache.get(&stale_key).unwrap();
    assert_eq!(snapshot.data, Some(json!([{"id": 42}])));
    assert!(matches!(
      snapshot.error,
      Some(ApiError::Http { status: 500, .. })
    ));
    assert!(!snapshot.is_loading);
  }

  #[tokio::test]
  async fn test_failed_fetch_with_empty_cache_surfaces_error() {
    let cache = test_cache();
    let result = cache
      .fetch(&key("accounts:{}"), || async {
        Err(ApiError::Http {
          status: 401,
          body: "unauthorized".to_string(),
        })
      })
      .await;
    assert_eq!(
      result.unwrap_err(),
      ApiError::Http {
        status: 401,
        body: "unauthorized".to_string(),
      }
    );
  }

  #[tokio::test]
  async fn test_retry_is_bounded() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let result = cache
      .fetch(&key("bills:{}"), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
          Err(ApiError::Http {
            status: 503,
            body: String::new(),
          })
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_non_retryable_error_fails_fast() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let result = cache
      .fetch(&key("bills:{}"), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
          Err(ApiError::Http {
            status: 404,
            body: String::new(),
          })
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_mutate_returns_previous_and_restore_rolls_back() {
    let cache = test_cache();
    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([{"id": 1, "paid": false}]));
    cache.fetch(&key("bills:{}"), fetcher).await.unwrap();

    let previous = cache.mutate(&key("bills:{}"), |value| {
      value[0]["paid"] = json!(true);
    });
    assert_eq!(previous, Some(json!([{"id": 1, "paid": false}])));
    assert_eq!(
      cache.get(&key("bills:{}")).unwrap().data,
      Some(json!([{"id": 1, "paid": true}]))
    );

    cache.restore(&key("bills:{}"), previous.unwrap());
    assert_eq!(
      cache.get(&key("bills:{}")).unwrap().data,
      Some(json!([{"id": 1, "paid": false}]))
    );
  }

  #[tokio::test]
  async fn test_mutate_without_value_is_a_noop() {
    let cache = test_cache();
    assert!(cache.mutate(&key("bills:{}"), |_| {}).is_none());
  }

  #[tokio::test]
  async fn test_subscription_sees_fetch_results() {
    let cache = test_cache();
    let mut sub = cache.subscribe(&key("alerts:{}"));
    assert!(sub.snapshot().data.is_none());

    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([{"id": 9}]));
    cache.fetch(&key("alerts:{}"), fetcher).await.unwrap();

    assert!(
      tokio::time::timeout(std::time::Duration::from_secs(1), sub.changed())
        .await
        .unwrap()
    );
    let snapshot = sub.snapshot();
    assert_eq!(snapshot.data, Some(json!([{"id": 9}])));
    assert!(snapshot.error.is_none());
  }

  #[tokio::test]
  async fn test_sweep_spares_subscribed_entries() {
    let cache = QueryCache::with_policy(
      Arc::new(NoopStore),
      CachePolicy {
        freed_after: Duration::zero(),
        retry_base_delay: std::time::Duration::from_millis(1),
        ..CachePolicy::default()
      },
    );

    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([]));
    cache.fetch(&key("bills:{}"), fetcher).await.unwrap();
    let sub = cache.subscribe(&key("bills:{}"));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(cache.sweep(), 0);

    drop(sub);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(cache.sweep(), 1);
    assert!(cache.get(&key("bills:{}")).is_none());
  }

  #[tokio::test]
  async fn test_persist_flag_controls_durable_writes() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = QueryCache::new(store.clone());

    let persisted_key = TestKey {
      key: "bills:{}",
      persist: true,
      stale_after: None,
    };
    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([1]));
    cache.fetch(&persisted_key, fetcher).await.unwrap();

    let denied_key = TestKey {
      key: "transactions:{}",
      persist: false,
      stale_after: None,
    };
    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([2]));
    cache.fetch(&denied_key, fetcher).await.unwrap();

    assert!(store.load("bills:{}").unwrap().is_some());
    // Denied resources must never be written to durable storage
    assert!(store.load("transactions:{}").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_hydration_serves_persisted_value_without_network() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
      .store("bills:{}", &json!([{"id": 7}]), Utc::now())
      .unwrap();

    let cache = QueryCache::new(store);
    let calls = Arc::new(AtomicU32::new(0));
    let persisted_key = TestKey {
      key: "bills:{}",
      persist: true,
      stale_after: None,
    };

    let fetcher = counting_fetcher(calls.clone(), json!([]));
    let result = cache.fetch(&persisted_key, fetcher).await.unwrap();

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, json!([{"id": 7}]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_invalidate_removes_durable_copy() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = QueryCache::new(store.clone());

    let persisted_key = TestKey {
      key: "categories:{}",
      persist: true,
      stale_after: None,
    };
    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([1]));
    cache.fetch(&persisted_key, fetcher).await.unwrap();
    assert!(store.load("categories:{}").unwrap().is_some());

    cache.invalidate(&persisted_key);
    assert!(store.load("categories:{}").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_read_cached_returns_stale_data_without_fetching() {
    let cache = test_cache();
    let stale_key = TestKey {
      key: "bills:{}",
      persist: false,
      stale_after: Some(Duration::zero()),
    };
    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([1]));
    cache.fetch(&stale_key, fetcher).await.unwrap();

    let result = cache.read_cached(&stale_key).unwrap();
    assert_eq!(result.source, CacheSource::CacheStale);
    assert_eq!(result.data, json!([1]));
  }

  #[tokio::test]
  async fn test_read_cached_misses_on_empty_key() {
    let cache = test_cache();
    assert_eq!(
      cache.read_cached(&key("bills:{}")).unwrap_err(),
      ApiError::CacheMiss
    );
  }

  #[tokio::test]
  async fn test_clear_drops_memory_and_disk() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = QueryCache::new(store.clone());

    let persisted_key = TestKey {
      key: "bills:{}",
      persist: true,
      stale_after: None,
    };
    let fetcher = counting_fetcher(Arc::new(AtomicU32::new(0)), json!([1]));
    cache.fetch(&persisted_key, fetcher).await.unwrap();

    cache.clear();
    assert!(cache.get(&persisted_key).is_none());
    assert!(store.load("bills:{}").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_abandoned_fetch_still_updates_cache() {
    let cache = test_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let fetch = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key("bills:{}"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
              tokio::time::sleep(std::time::Duration::from_millis(30)).await;
              Ok(json!([1]))
            }
          })
          .await
      })
    };

    // The subscriber goes away before the fetch resolves.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    fetch.abort();

    // The fetch task keeps running and lands in the shared cache.
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    let snapshot = cache.get(&key("bills:{}")).unwrap();
    assert_eq!(snapshot.data, Some(json!([1])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
