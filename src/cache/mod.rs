//! Client-side query cache for server-derived data.
//!
//! This module is the single source of truth for data fetched from the
//! backend:
//! - Deduplicates concurrent fetches for the same key into one network call
//! - Enforces per-resource staleness windows, with stale data kept as a
//!   fallback while a refetch or an error is in progress
//! - Fans results out to live subscriptions
//! - Persists eligible resources to SQLite so reads survive a restart

mod entry;
mod storage;
mod store;
mod traits;

pub use entry::QuerySnapshot;
pub use storage::{NoopStore, PersistentStore, SqliteStore};
pub use store::{CachePolicy, QueryCache, QuerySubscription};
pub use traits::{CacheResult, CacheSource, QueryKey};
