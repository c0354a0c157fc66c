//! Cache key types for backend resources.
//!
//! Every resource declares its persistence eligibility as an explicit match
//! arm instead of a name convention, so adding a resource forces a decision
//! about whether it may touch durable storage. Sensitive and volatile
//! resources (transactions, accounts, credits, analytics) are never
//! persisted.

use chrono::Duration;

use crate::cache::QueryKey;

/// Query key types for backend API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKey {
  /// All bills
  Bills,
  /// Bills due within the next `days` days
  UpcomingBills { days: u32 },
  /// Budgets for one month ("YYYY-MM")
  Budgets { month: String },
  /// Active budget alerts
  BudgetAlerts,
  /// Spending categories
  Categories,
  /// Installment credits
  Credits,
  /// Aggregate credit position
  CreditBalance,
  /// Exchange rates for one base currency
  ExchangeRates { base: String },
  /// Transactions, optionally filtered by account and month
  Transactions {
    account_id: Option<u64>,
    month: Option<String>,
  },
  /// Money accounts
  Accounts,
  /// Cost-of-living comparison between two cities
  RelocationComparison { from: String, to: String },
  /// Monthly income/expense report
  MonthlyReport { month: String },
}

impl ResourceKey {
  /// Logical resource name, the prefix shared by all parameter variants.
  pub fn resource(&self) -> &'static str {
    match self {
      Self::Bills => "bills",
      Self::UpcomingBills { .. } => "upcoming_bills",
      Self::Budgets { .. } => "budgets",
      Self::BudgetAlerts => "budget_alerts",
      Self::Categories => "categories",
      Self::Credits => "credits",
      Self::CreditBalance => "credit_balance",
      Self::ExchangeRates { .. } => "exchange_rates",
      Self::Transactions { .. } => "transactions",
      Self::Accounts => "accounts",
      Self::RelocationComparison { .. } => "relocation_comparison",
      Self::MonthlyReport { .. } => "monthly_report",
    }
  }

  /// Parameters in canonical form: alphabetical by name, normalized values,
  /// absent options omitted. Equivalent requests must stringify identically.
  fn params(&self) -> String {
    match self {
      Self::Bills
      | Self::BudgetAlerts
      | Self::Categories
      | Self::Credits
      | Self::CreditBalance
      | Self::Accounts => String::new(),
      Self::UpcomingBills { days } => format!("days:{}", days),
      Self::Budgets { month } | Self::MonthlyReport { month } => {
        format!("month:{}", month.trim())
      }
      Self::ExchangeRates { base } => format!("base:{}", normalize_currency(base)),
      Self::Transactions { account_id, month } => {
        let mut parts = Vec::new();
        if let Some(id) = account_id {
          parts.push(format!("account_id:{}", id));
        }
        if let Some(month) = month {
          parts.push(format!("month:{}", month.trim()));
        }
        parts.join(",")
      }
      Self::RelocationComparison { from, to } => {
        format!("from:{},to:{}", normalize_city(from), normalize_city(to))
      }
    }
  }
}

impl QueryKey for ResourceKey {
  fn cache_key(&self) -> String {
    format!("{}:{{{}}}", self.resource(), self.params())
  }

  fn description(&self) -> String {
    match self {
      Self::Bills => "all bills".to_string(),
      Self::UpcomingBills { days } => format!("bills due within {} days", days),
      Self::Budgets { month } => format!("budgets for {}", month),
      Self::BudgetAlerts => "budget alerts".to_string(),
      Self::Categories => "categories".to_string(),
      Self::Credits => "credits".to_string(),
      Self::CreditBalance => "credit balance".to_string(),
      Self::ExchangeRates { base } => format!("exchange rates for {}", normalize_currency(base)),
      Self::Transactions { account_id, month } => match (account_id, month) {
        (Some(id), Some(m)) => format!("transactions on account {} in {}", id, m),
        (Some(id), None) => format!("transactions on account {}", id),
        (None, Some(m)) => format!("transactions in {}", m),
        (None, None) => "all transactions".to_string(),
      },
      Self::Accounts => "accounts".to_string(),
      Self::RelocationComparison { from, to } => format!("relocation {} -> {}", from, to),
      Self::MonthlyReport { month } => format!("report for {}", month),
    }
  }

  fn persist(&self) -> bool {
    match self {
      Self::Bills
      | Self::UpcomingBills { .. }
      | Self::Budgets { .. }
      | Self::BudgetAlerts
      | Self::Categories
      | Self::ExchangeRates { .. } => true,
      // Never written to durable client storage.
      Self::Credits
      | Self::CreditBalance
      | Self::Transactions { .. }
      | Self::Accounts
      | Self::RelocationComparison { .. }
      | Self::MonthlyReport { .. } => false,
    }
  }

  fn stale_after(&self) -> Option<Duration> {
    match self {
      // Volatile quotes go stale quickly
      Self::ExchangeRates { .. } => Some(Duration::minutes(1)),
      Self::CreditBalance => Some(Duration::minutes(1)),
      _ => None,
    }
  }
}

/// Normalize a currency code for consistent keys.
fn normalize_currency(code: &str) -> String {
  code.trim().to_uppercase()
}

/// Normalize a city name for consistent keys.
fn normalize_city(city: &str) -> String {
  city.trim().to_lowercase()
}
