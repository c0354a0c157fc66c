//! Plain-text rendering of cached data for the CLI.

use crate::api::types::{
  Account, Bill, Budget, BudgetAlert, Category, Credit, CreditBalance, ExchangeRates,
  MonthlyReport, RelocationComparison, Transaction,
};

/// Truncate a string to a maximum length, adding "..." if truncated.
/// Counts characters, not bytes, so multibyte names never split mid-char.
fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Render rows as a fixed-width table with a header line.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
  // Widths in characters; format! padding counts characters too.
  let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
  for row in rows {
    for (i, cell) in row.iter().enumerate() {
      let cell_width = cell.chars().count();
      if i < widths.len() && cell_width > widths[i] {
        widths[i] = cell_width;
      }
    }
  }

  let mut out = String::new();
  for (i, header) in headers.iter().enumerate() {
    out.push_str(&format!("{:<width$}  ", header, width = widths[i]));
  }
  out.push('\n');
  for row in rows {
    for (i, cell) in row.iter().enumerate() {
      out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
    }
    out.push('\n');
  }
  out
}

fn money(amount: f64, currency: &str) -> String {
  format!("{:.2} {}", amount, currency)
}

pub fn bills(bills: &[Bill]) -> String {
  let rows: Vec<Vec<String>> = bills
    .iter()
    .map(|b| {
      vec![
        b.id.to_string(),
        truncate(&b.name, 32),
        money(b.amount, &b.currency),
        b.due_date.to_string(),
        if b.paid { "paid" } else { "due" }.to_string(),
        if b.autopay { "auto" } else { "" }.to_string(),
      ]
    })
    .collect();
  table(&["ID", "NAME", "AMOUNT", "DUE", "STATUS", ""], &rows)
}

pub fn budgets(budgets: &[Budget]) -> String {
  let rows: Vec<Vec<String>> = budgets
    .iter()
    .map(|b| {
      vec![
        b.category_id.to_string(),
        money(b.spent, &b.currency),
        money(b.limit, &b.currency),
        money(b.remaining(), &b.currency),
      ]
    })
    .collect();
  table(&["CATEGORY", "SPENT", "LIMIT", "REMAINING"], &rows)
}

pub fn alerts(alerts: &[BudgetAlert]) -> String {
  let rows: Vec<Vec<String>> = alerts
    .iter()
    .map(|a| {
      vec![
        a.id.to_string(),
        format!("{:?}", a.severity).to_lowercase(),
        truncate(&a.message, 60),
        a.created_at.format("%Y-%m-%d %H:%M").to_string(),
      ]
    })
    .collect();
  table(&["ID", "SEVERITY", "MESSAGE", "RAISED"], &rows)
}

pub fn categories(categories: &[Category]) -> String {
  let rows: Vec<Vec<String>> = categories
    .iter()
    .map(|c| {
      vec![
        c.id.to_string(),
        truncate(&c.name, 32),
        c.icon.clone().unwrap_or_default(),
      ]
    })
    .collect();
  table(&["ID", "NAME", "ICON"], &rows)
}

pub fn credits(credits: &[Credit]) -> String {
  let rows: Vec<Vec<String>> = credits
    .iter()
    .map(|c| {
      vec![
        c.id.to_string(),
        truncate(&c.name, 32),
        truncate(&c.provider, 24),
        format!("{}/{}", c.installments_paid, c.installments_total),
        money(c.monthly_payment, &c.currency),
      ]
    })
    .collect();
  table(&["ID", "NAME", "PROVIDER", "PAID", "MONTHLY"], &rows)
}

pub fn credit_balance(balance: &CreditBalance) -> String {
  format!(
    "Total owed:         {}\nMonthly commitment: {}\n",
    money(balance.total_owed, &balance.currency),
    money(balance.monthly_commitment, &balance.currency),
  )
}

pub fn exchange_rates(rates: &ExchangeRates) -> String {
  let rows: Vec<Vec<String>> = rates
    .rates
    .iter()
    .map(|(code, rate)| vec![code.clone(), format!("{:.4}", rate)])
    .collect();
  format!(
    "Base {} (as of {})\n{}",
    rates.base,
    rates.as_of.format("%Y-%m-%d %H:%M"),
    table(&["CURRENCY", "RATE"], &rows)
  )
}

pub fn transactions(transactions: &[Transaction]) -> String {
  let rows: Vec<Vec<String>> = transactions
    .iter()
    .map(|t| {
      vec![
        t.occurred_at.format("%Y-%m-%d").to_string(),
        truncate(&t.description, 40),
        money(t.amount, &t.currency),
        t.account_id.to_string(),
      ]
    })
    .collect();
  table(&["DATE", "DESCRIPTION", "AMOUNT", "ACCOUNT"], &rows)
}

pub fn accounts(accounts: &[Account]) -> String {
  let rows: Vec<Vec<String>> = accounts
    .iter()
    .map(|a| {
      vec![
        a.id.to_string(),
        truncate(&a.name, 32),
        format!("{:?}", a.kind).to_lowercase(),
        money(a.balance, &a.currency),
      ]
    })
    .collect();
  table(&["ID", "NAME", "KIND", "BALANCE"], &rows)
}

pub fn relocation(comparison: &RelocationComparison) -> String {
  let rows: Vec<Vec<String>> = comparison
    .categories
    .iter()
    .map(|c| vec![c.name.clone(), format!("{:+.1}%", c.delta * 100.0)])
    .collect();
  format!(
    "{} -> {}: {:+.1}% overall\n{}",
    comparison.from_city,
    comparison.to_city,
    comparison.cost_index_delta * 100.0,
    table(&["CATEGORY", "DELTA"], &rows)
  )
}

pub fn report(report: &MonthlyReport) -> String {
  let rows: Vec<Vec<String>> = report
    .by_category
    .iter()
    .map(|c| vec![truncate(&c.category_name, 32), format!("{:.2}", c.spent)])
    .collect();
  format!(
    "Report {}\nIncome:   {:.2}\nExpenses: {:.2}\nNet:      {:.2}\n\n{}",
    report.month,
    report.income,
    report.expenses,
    report.net,
    table(&["CATEGORY", "SPENT"], &rows)
  )
}
