//! Typed models mirroring the backend API schema.
//!
//! The backend speaks camelCase JSON; everything here derives serde with a
//! rename so domain code stays idiomatic Rust. Payloads are cached as raw
//! JSON and only typed at the resource layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recurring or one-off bill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
  pub id: u64,
  pub name: String,
  pub amount: f64,
  pub currency: String,
  pub due_date: NaiveDate,
  pub paid: bool,
  #[serde(default)]
  pub category_id: Option<u64>,
  #[serde(default)]
  pub autopay: bool,
}

/// A per-category spending budget for one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
  pub id: u64,
  pub category_id: u64,
  /// Month in "YYYY-MM" form
  pub month: String,
  pub limit: f64,
  pub spent: f64,
  pub currency: String,
}

impl Budget {
  pub fn remaining(&self) -> f64 {
    self.limit - self.spent
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
  Info,
  Warning,
  Critical,
}

/// A budget threshold alert raised by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
  pub id: u64,
  pub budget_id: u64,
  pub message: String,
  pub severity: AlertSeverity,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub dismissed: bool,
}

/// A spending category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub icon: Option<String>,
  #[serde(default)]
  pub color: Option<String>,
}

/// Payload for creating or updating a category.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInput {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
}

/// An installment credit (loan, financed purchase).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
  pub id: u64,
  pub name: String,
  pub provider: String,
  pub installments_total: u32,
  pub installments_paid: u32,
  pub monthly_payment: f64,
  pub currency: String,
}

/// Aggregate position across all credits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
  pub total_owed: f64,
  pub monthly_commitment: f64,
  pub currency: String,
}

/// Exchange rates relative to one base currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRates {
  pub base: String,
  pub rates: BTreeMap<String, f64>,
  pub as_of: DateTime<Utc>,
}

/// A single ledger movement on an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
  pub id: u64,
  pub account_id: u64,
  /// Negative for spending, positive for income
  pub amount: f64,
  pub currency: String,
  #[serde(default)]
  pub category_id: Option<u64>,
  pub description: String,
  pub occurred_at: DateTime<Utc>,
}

/// Payload for recording a new transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
  pub account_id: u64,
  pub amount: f64,
  pub currency: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category_id: Option<u64>,
  pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
  Checking,
  Savings,
  Credit,
  Cash,
}

/// A money account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
  pub id: u64,
  pub name: String,
  pub kind: AccountKind,
  pub balance: f64,
  pub currency: String,
}

/// Per-category line in a cost-of-living comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationCategory {
  pub name: String,
  /// Relative cost difference, e.g. 0.12 for "12% more expensive"
  pub delta: f64,
}

/// Cost-of-living comparison between two cities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationComparison {
  pub from_city: String,
  pub to_city: String,
  pub cost_index_delta: f64,
  pub categories: Vec<RelocationCategory>,
}

/// Spending aggregated per category for a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpend {
  pub category_id: u64,
  pub category_name: String,
  pub spent: f64,
}

/// Income/expense summary for one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReport {
  /// Month in "YYYY-MM" form
  pub month: String,
  pub income: f64,
  pub expenses: f64,
  pub net: f64,
  pub by_category: Vec<CategorySpend>,
}
