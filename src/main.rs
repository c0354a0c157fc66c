mod api;
mod cache;
mod config;
mod render;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use api::keys::ResourceKey;
use api::resources::CachedApiClient;
use api::types::{BudgetAlert, CategoryInput, TransactionInput};

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "A caching terminal client for a personal-finance REST API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tally/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Invalidate the cached data for this command before reading
  #[arg(short, long)]
  refresh: bool,

  /// Serve reads from the cache only, never the network
  #[arg(long, conflicts_with = "refresh")]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List bills
  Bills {
    /// Only bills due within the next N days
    #[arg(long)]
    upcoming: Option<u32>,
  },
  /// Mark a bill as paid
  Pay { id: u64 },
  /// Show budgets for a month (default: current month)
  Budgets {
    #[arg(long)]
    month: Option<String>,
  },
  /// Show budget alerts
  Alerts {
    /// Dismiss an alert by id
    #[arg(long)]
    dismiss: Option<u64>,
    /// Keep watching for new alerts
    #[arg(long)]
    watch: bool,
  },
  /// Manage spending categories
  Categories {
    #[command(subcommand)]
    action: Option<CategoryAction>,
  },
  /// Show installment credits
  Credits {
    /// Show the aggregate balance instead of the list
    #[arg(long)]
    balance: bool,
  },
  /// Show exchange rates
  Rates {
    #[arg(long, default_value = "USD")]
    base: String,
  },
  /// List transactions
  Transactions {
    #[arg(long)]
    account: Option<u64>,
    #[arg(long)]
    month: Option<String>,
  },
  /// Record a transaction
  Spend {
    #[arg(long)]
    account: u64,
    /// Negative for spending, positive for income
    #[arg(long, allow_hyphen_values = true)]
    amount: f64,
    #[arg(long)]
    description: String,
    #[arg(long)]
    category: Option<u64>,
    #[arg(long, default_value = "EUR")]
    currency: String,
  },
  /// List accounts
  Accounts,
  /// Monthly income/expense report (default: current month)
  Report { month: Option<String> },
  /// Compare cost of living between two cities
  Relocate { from: String, to: String },
  /// Cache maintenance
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop all cached data, in memory and on disk
  Clear,
}

#[derive(Subcommand, Debug)]
enum CategoryAction {
  /// Create a category
  Add {
    name: String,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long)]
    color: Option<String>,
  },
  /// Rename a category
  Rename { id: u64, name: String },
  /// Delete a category
  Delete { id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing();

  let config = config::Config::load(args.config.as_deref())?;
  let client = CachedApiClient::new(&config)?.with_offline(args.offline);

  run(client, args).await
}

async fn run(client: CachedApiClient, args: Args) -> Result<()> {
  let current_month = chrono::Utc::now().format("%Y-%m").to_string();

  match args.command {
    Command::Bills { upcoming } => match upcoming {
      Some(days) => {
        if args.refresh {
          client.refresh("upcoming_bills");
        }
        let bills = client.upcoming_bills(days).await?;
        print!("{}", render::bills(&bills));
      }
      None => {
        if args.refresh {
          client.refresh("bills");
        }
        let bills = client.bills().await?;
        print!("{}", render::bills(&bills));
      }
    },
    Command::Pay { id } => {
      let bill = client.mark_bill_paid(id).await?;
      println!("Paid: {} ({:.2} {})", bill.name, bill.amount, bill.currency);
    }
    Command::Budgets { month } => {
      if args.refresh {
        client.refresh("budgets");
      }
      let month = month.unwrap_or(current_month);
      let budgets = client.budgets(&month).await?;
      print!("{}", render::budgets(&budgets));
    }
    Command::Alerts { dismiss, watch } => {
      if let Some(id) = dismiss {
        client.dismiss_alert(id).await?;
        println!("Dismissed alert {}", id);
      } else if watch {
        watch_alerts(client).await?;
      } else {
        if args.refresh {
          client.refresh("budget_alerts");
        }
        let alerts = client.alerts().await?;
        print!("{}", render::alerts(&alerts));
      }
    }
    Command::Categories { action } => match action {
      None => {
        if args.refresh {
          client.refresh("categories");
        }
        let categories = client.categories().await?;
        print!("{}", render::categories(&categories));
      }
      Some(CategoryAction::Add { name, icon, color }) => {
        let created = client
          .create_category(&CategoryInput { name, icon, color })
          .await?;
        println!("Created category {} ({})", created.name, created.id);
      }
      Some(CategoryAction::Rename { id, name }) => {
        let updated = client
          .update_category(
            id,
            &CategoryInput {
              name,
              icon: None,
              color: None,
            },
          )
          .await?;
        println!("Renamed category {} to {}", id, updated.name);
      }
      Some(CategoryAction::Delete { id }) => {
        client.delete_category(id).await?;
        println!("Deleted category {}", id);
      }
    },
    Command::Credits { balance } => {
      if args.refresh {
        client.refresh("credits");
        client.refresh("credit_balance");
      }
      if balance {
        let balance = client.credit_balance().await?;
        print!("{}", render::credit_balance(&balance));
      } else {
        let credits = client.credits().await?;
        print!("{}", render::credits(&credits));
      }
    }
    Command::Rates { base } => {
      if args.refresh {
        client.refresh("exchange_rates");
      }
      let rates = client.exchange_rates(&base).await?;
      print!("{}", render::exchange_rates(&rates));
    }
    Command::Transactions { account, month } => {
      if args.refresh {
        client.refresh("transactions");
      }
      let transactions = client.transactions(account, month.as_deref()).await?;
      print!("{}", render::transactions(&transactions));
    }
    Command::Spend {
      account,
      amount,
      description,
      category,
      currency,
    } => {
      let created = client
        .create_transaction(&TransactionInput {
          account_id: account,
          amount,
          currency,
          category_id: category,
          description,
        })
        .await?;
      println!(
        "Recorded: {} ({:.2} {})",
        created.description, created.amount, created.currency
      );
    }
    Command::Accounts => {
      if args.refresh {
        client.refresh("accounts");
      }
      let accounts = client.accounts().await?;
      print!("{}", render::accounts(&accounts));
    }
    Command::Report { month } => {
      if args.refresh {
        client.refresh("monthly_report");
      }
      let month = month.unwrap_or(current_month);
      let report = client.monthly_report(&month).await?;
      print!("{}", render::report(&report));
    }
    Command::Relocate { from, to } => {
      if args.refresh {
        client.refresh("relocation_comparison");
      }
      let comparison = client.relocation_comparison(&from, &to).await?;
      print!("{}", render::relocation(&comparison));
    }
    Command::Cache { action } => match action {
      CacheAction::Clear => {
        client.cache().clear();
        println!("Cache cleared");
      }
    },
  }

  Ok(())
}

const ALERT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Follow budget alerts until interrupted, printing on every change.
async fn watch_alerts(client: CachedApiClient) -> Result<()> {
  let sweeper = client.cache().spawn_sweeper(SWEEP_INTERVAL);
  let mut sub = client.watch(&ResourceKey::BudgetAlerts);

  let poller = {
    let client = client.clone();
    tokio::spawn(async move {
      loop {
        let _ = client.alerts().await;
        tokio::time::sleep(ALERT_POLL_INTERVAL).await;
        client.refresh("budget_alerts");
      }
    })
  };

  while sub.changed().await {
    let snapshot = sub.snapshot();
    if let Some(err) = &snapshot.error {
      eprintln!("fetch error: {}", err);
    }
    if let Some(data) = snapshot.data {
      if let Ok(alerts) = serde_json::from_value::<Vec<BudgetAlert>>(data) {
        print!("{}", render::alerts(&alerts));
      }
    }
  }

  poller.abort();
  sweeper.abort();
  Ok(())
}

/// Log to a file so output on stdout stays clean.
/// Controlled with RUST_LOG, e.g. RUST_LOG=tally=debug.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::state_dir()
    .or_else(dirs::data_dir)
    .map(|d| d.join("tally"))?;
  std::fs::create_dir_all(&log_dir).ok()?;

  let appender = tracing_appender::rolling::never(log_dir, "tally.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}
