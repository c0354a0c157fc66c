//! Cached resource layer over the backend API.
//!
//! `CachedApiClient` binds each UI-facing concern to the query cache: reads
//! go through [`QueryCache::fetch`] under the resource's key, writes call
//! the HTTP adapter and then invalidate the read keys they affect. This is
//! the only layer that knows which keys belong together.

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::{
  CachePolicy, NoopStore, PersistentStore, QueryCache, QuerySubscription, SqliteStore,
};
use crate::config::Config;

use super::client::ApiClient;
use super::error::ApiError;
use super::keys::ResourceKey;
use super::types::{
  Account, Bill, Budget, BudgetAlert, Category, CategoryInput, Credit, CreditBalance,
  ExchangeRates, MonthlyReport, RelocationComparison, Transaction, TransactionInput,
};

/// Backend client with transparent caching.
///
/// Wraps the plain [`ApiClient`] with the same surface, but reads are
/// deduplicated and cached, and survive a flaky network by serving stale
/// data.
#[derive(Clone)]
pub struct CachedApiClient {
  inner: ApiClient,
  cache: QueryCache,
  /// Serve reads from cache only; a missing entry is a CacheMiss error
  offline: bool,
}

impl CachedApiClient {
  /// Create a cached client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let inner = ApiClient::new(config)?;

    let store: Arc<dyn PersistentStore> = if config.cache.disk {
      Arc::new(SqliteStore::open(config.cache.db_path.clone())?)
    } else {
      Arc::new(NoopStore)
    };

    let mut policy = CachePolicy::default();
    if let Some(secs) = config.cache.stale_after_secs {
      policy.stale_after = chrono::Duration::seconds(secs as i64);
    }
    if let Some(secs) = config.cache.freed_after_secs {
      policy.freed_after = chrono::Duration::seconds(secs as i64);
    }

    Ok(Self {
      inner,
      cache: QueryCache::with_policy(store, policy),
      offline: false,
    })
  }

  /// Never hit the network; reads resolve from cache or fail with
  /// [`ApiError::CacheMiss`]. Writes are unaffected.
  pub fn with_offline(mut self, offline: bool) -> Self {
    self.offline = offline;
    self
  }

  #[cfg(test)]
  pub fn with_parts(inner: ApiClient, cache: QueryCache) -> Self {
    Self {
      inner,
      cache,
      offline: false,
    }
  }

  /// The underlying query cache.
  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Subscribe to live snapshots for one resource key.
  pub fn watch(&self, key: &ResourceKey) -> QuerySubscription {
    self.cache.subscribe(key)
  }

  /// Force the next read of a resource to hit the network.
  pub fn refresh(&self, resource: &str) {
    self.cache.invalidate_resource(resource);
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub async fn bills(&self) -> std::result::Result<Vec<Bill>, ApiError> {
    self.read(ResourceKey::Bills, "/bills".to_string()).await
  }

  pub async fn upcoming_bills(&self, days: u32) -> std::result::Result<Vec<Bill>, ApiError> {
    self
      .read(
        ResourceKey::UpcomingBills { days },
        format!("/bills/upcoming?{}", query(&[("days", days.to_string())])),
      )
      .await
  }

  pub async fn budgets(&self, month: &str) -> std::result::Result<Vec<Budget>, ApiError> {
    self
      .read(
        ResourceKey::Budgets {
          month: month.to_string(),
        },
        format!("/budgets?{}", query(&[("month", month.to_string())])),
      )
      .await
  }

  pub async fn alerts(&self) -> std::result::Result<Vec<BudgetAlert>, ApiError> {
    self
      .read(ResourceKey::BudgetAlerts, "/alerts".to_string())
      .await
  }

  pub async fn categories(&self) -> std::result::Result<Vec<Category>, ApiError> {
    self
      .read(ResourceKey::Categories, "/categories".to_string())
      .await
  }

  pub async fn credits(&self) -> std::result::Result<Vec<Credit>, ApiError> {
    self.read(ResourceKey::Credits, "/credits".to_string()).await
  }

  pub async fn credit_balance(&self) -> std::result::Result<CreditBalance, ApiError> {
    self
      .read(ResourceKey::CreditBalance, "/credits/balance".to_string())
      .await
  }

  pub async fn exchange_rates(&self, base: &str) -> std::result::Result<ExchangeRates, ApiError> {
    self
      .read(
        ResourceKey::ExchangeRates {
          base: base.to_string(),
        },
        format!(
          "/exchange-rates?{}",
          query(&[("base", base.trim().to_uppercase())])
        ),
      )
      .await
  }

  pub async fn transactions(
    &self,
    account_id: Option<u64>,
    month: Option<&str>,
  ) -> std::result::Result<Vec<Transaction>, ApiError> {
    let mut pairs = Vec::new();
    if let Some(id) = account_id {
      pairs.push(("accountId", id.to_string()));
    }
    if let Some(month) = month {
      pairs.push(("month", month.to_string()));
    }
    let path = if pairs.is_empty() {
      "/transactions".to_string()
    } else {
      format!("/transactions?{}", query(&pairs))
    };

    self
      .read(
        ResourceKey::Transactions {
          account_id,
          month: month.map(String::from),
        },
        path,
      )
      .await
  }

  pub async fn accounts(&self) -> std::result::Result<Vec<Account>, ApiError> {
    self
      .read(ResourceKey::Accounts, "/accounts".to_string())
      .await
  }

  pub async fn relocation_comparison(
    &self,
    from: &str,
    to: &str,
  ) -> std::result::Result<RelocationComparison, ApiError> {
    self
      .read(
        ResourceKey::RelocationComparison {
          from: from.to_string(),
          to: to.to_string(),
        },
        format!(
          "/relocation/compare?{}",
          query(&[("from", from.to_string()), ("to", to.to_string())])
        ),
      )
      .await
  }

  pub async fn monthly_report(&self, month: &str) -> std::result::Result<MonthlyReport, ApiError> {
    self
      .read(
        ResourceKey::MonthlyReport {
          month: month.to_string(),
        },
        format!("/reports/monthly?{}", query(&[("month", month.to_string())])),
      )
      .await
  }

  // ==========================================================================
  // Writes - each invalidates the read keys it affects
  // ==========================================================================

  /// Mark a bill as paid.
  ///
  /// The cached bills list is updated optimistically; if the server call
  /// fails the previous value is restored and no invalidation happens.
  pub async fn mark_bill_paid(&self, id: u64) -> std::result::Result<Bill, ApiError> {
    if id == 0 {
      return Err(ApiError::Validation("bill id must be non-zero".to_string()));
    }

    let previous = self.cache.mutate(&ResourceKey::Bills, |value| {
      if let Some(bills) = value.as_array_mut() {
        for bill in bills {
          if bill.get("id").and_then(Value::as_u64) == Some(id) {
            bill["paid"] = Value::Bool(true);
          }
        }
      }
    });

    match self
      .inner
      .post::<Bill>(&format!("/bills/{}/pay", id), &json!({}))
      .await
    {
      Ok(bill) => {
        self.cache.invalidate(&ResourceKey::Bills);
        self.cache.invalidate_resource("upcoming_bills");
        Ok(bill)
      }
      Err(err) => {
        // Roll back to the last confirmed server state.
        if let Some(previous) = previous {
          self.cache.restore(&ResourceKey::Bills, previous);
        }
        Err(err)
      }
    }
  }

  pub async fn create_transaction(
    &self,
    input: &TransactionInput,
  ) -> std::result::Result<Transaction, ApiError> {
    if input.amount == 0.0 {
      return Err(ApiError::Validation(
        "transaction amount must be non-zero".to_string(),
      ));
    }
    if input.description.trim().is_empty() {
      return Err(ApiError::Validation(
        "transaction description must not be empty".to_string(),
      ));
    }

    let body = serde_json::to_value(input).map_err(|e| ApiError::Validation(e.to_string()))?;
    let created = self.inner.post::<Transaction>("/transactions", &body).await?;

    // Spending moves balances, budgets and reports.
    self.cache.invalidate_resource("transactions");
    self.cache.invalidate_resource("accounts");
    self.cache.invalidate_resource("budgets");
    self.cache.invalidate_resource("monthly_report");
    Ok(created)
  }

  pub async fn create_category(
    &self,
    input: &CategoryInput,
  ) -> std::result::Result<Category, ApiError> {
    validate_category(input)?;
    let body = serde_json::to_value(input).map_err(|e| ApiError::Validation(e.to_string()))?;
    let created = self.inner.post::<Category>("/categories", &body).await?;
    self.cache.invalidate(&ResourceKey::Categories);
    Ok(created)
  }

  pub async fn update_category(
    &self,
    id: u64,
    input: &CategoryInput,
  ) -> std::result::Result<Category, ApiError> {
    validate_category(input)?;
    let body = serde_json::to_value(input).map_err(|e| ApiError::Validation(e.to_string()))?;
    let updated = self
      .inner
      .put::<Category>(&format!("/categories/{}", id), &body)
      .await?;
    self.cache.invalidate(&ResourceKey::Categories);
    Ok(updated)
  }

  pub async fn delete_category(&self, id: u64) -> std::result::Result<(), ApiError> {
    self.inner.delete(&format!("/categories/{}", id)).await?;
    self.cache.invalidate(&ResourceKey::Categories);
    // Budgets reference categories
    self.cache.invalidate_resource("budgets");
    Ok(())
  }

  pub async fn dismiss_alert(&self, id: u64) -> std::result::Result<(), ApiError> {
    self
      .inner
      .request_empty(
        reqwest::Method::POST,
        &format!("/alerts/{}/dismiss", id),
        None,
      )
      .await?;
    self.cache.invalidate(&ResourceKey::BudgetAlerts);
    Ok(())
  }

  /// Fetch one resource through the cache and type the payload.
  async fn read<T: DeserializeOwned>(
    &self,
    key: ResourceKey,
    path: String,
  ) -> std::result::Result<T, ApiError> {
    if self.offline {
      return decode(self.cache.read_cached(&key)?.data);
    }

    let inner = self.inner.clone();
    let result = self
      .cache
      .fetch(&key, move || {
        let inner = inner.clone();
        let path = path.clone();
        async move { inner.get::<Value>(&path).await }
      })
      .await?;

    decode(result.data)
  }
}

fn validate_category(input: &CategoryInput) -> std::result::Result<(), ApiError> {
  if input.name.trim().is_empty() {
    return Err(ApiError::Validation(
      "category name must not be empty".to_string(),
    ));
  }
  Ok(())
}

fn decode<T: DeserializeOwned>(value: Value) -> std::result::Result<T, ApiError> {
  serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

fn query(pairs: &[(&str, String)]) -> String {
  let mut serializer = url::form_urlencoded::Serializer::new(String::new());
  for (name, value) in pairs {
    serializer.append_pair(name, value);
  }
  serializer.finish()
}
