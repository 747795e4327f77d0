use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::{
    BalanceProjector, ReconciliationEngine, SavingsService, SchedulerDriver,
};
use crate::clients::{
    Cache, ConfigSource, InMemoryCache, LogDistributor, LogPublisher, StaticConfigSource,
};
use crate::domain::{Boost, BoostStatus, MoneyAmount, SettlementStatus, Unit};
use crate::io::Exporter;
use crate::storage::Repository;

/// Floatbook - pooled-float savings ledger
#[derive(Parser)]
#[command(name = "floatbook")]
#[command(about = "A pooled-float savings ledger with daily accrual and reconciliation")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "floatbook.db")]
    pub database: String,

    /// Float configuration file (JSON array of client-float variables)
    #[arg(short, long, default_value = "floats.json")]
    pub floats: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Create an end-user account on a client float
    AccountNew {
        /// Client ID (must appear in the float configuration)
        #[arg(long)]
        client: String,

        /// Float ID
        #[arg(long = "float")]
        float_id: String,

        /// Owning user ID (generated when omitted)
        #[arg(long)]
        user: Option<Uuid>,
    },

    /// Record a saving event (negative amounts record withdrawals)
    Save {
        /// Account ID
        account: Uuid,

        /// Amount in whole currency (e.g., "50.00"); negative withdraws
        #[arg(short, long)]
        amount: String,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Mark the event settled immediately
        #[arg(long)]
        settled: bool,

        /// Initiation date (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Settle a pending saving event
    Settle {
        /// Transaction ID
        transaction: Uuid,
    },

    /// Move a ledger entry to a new settlement status
    SetStatus {
        /// Transaction ID
        transaction: Uuid,

        /// Target status: PENDING, SETTLED, CANCELLED or EXPIRED
        status: String,
    },

    /// Show an account's current balance and projections
    Balance {
        /// Account ID
        account: Uuid,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Days to project forward
        #[arg(long, default_value_t = 5)]
        days: u32,
    },

    /// Run the nightly batch: accrual, expiry and reconciliation per float
    Nightly {
        /// Write the run report to this CSV file
        #[arg(long)]
        out: Option<String>,
    },

    /// Reconcile one float's totals and record anomalies
    Check {
        /// Client ID
        #[arg(long)]
        client: String,

        /// Float ID
        #[arg(long = "float")]
        float_id: String,
    },

    /// List float logs (accruals and anomalies) for a float
    Logs {
        /// Client ID
        #[arg(long)]
        client: String,

        /// Float ID
        #[arg(long = "float")]
        float_id: String,

        /// Write anomaly logs to this CSV file
        #[arg(long)]
        out: Option<String>,
    },

    /// Offer a boost against an account (local runs and demos)
    BoostNew {
        /// Account ID
        account: Uuid,

        /// Hours until the boost expires
        #[arg(long, default_value_t = 48)]
        expires_in_hours: i64,
    },
}

/// The wired-up components a command runs against.
struct AppContext {
    repo: Arc<Repository>,
    config_source: Arc<dyn ConfigSource>,
    cache: Arc<dyn Cache>,
}

impl AppContext {
    async fn connect(database: &str, floats: &str) -> Result<Self> {
        let repo = Repository::connect(&format!("sqlite:{database}")).await?;
        let config_source = StaticConfigSource::from_path(floats)?;
        Ok(Self {
            repo: Arc::new(repo),
            config_source: Arc::new(config_source),
            cache: Arc::new(InMemoryCache::new()),
        })
    }

    fn savings_service(&self) -> SavingsService {
        SavingsService::new(
            self.repo.clone(),
            self.config_source.clone(),
            Arc::new(LogPublisher),
        )
    }

    fn projector(&self) -> BalanceProjector {
        BalanceProjector::new(
            self.repo.clone(),
            self.config_source.clone(),
            self.cache.clone(),
        )
    }

    fn reconciliation(&self) -> Arc<ReconciliationEngine> {
        Arc::new(ReconciliationEngine::new(self.repo.clone()))
    }

    fn scheduler(&self) -> SchedulerDriver {
        SchedulerDriver::new(
            self.repo.clone(),
            self.config_source.clone(),
            Arc::new(LogDistributor),
            Arc::new(LogPublisher),
            self.reconciliation(),
        )
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                Repository::init(&format!("sqlite:{}?mode=rwc", self.database)).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::AccountNew {
                client,
                float_id,
                user,
            } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let service = ctx.savings_service();
                let owner = user.unwrap_or_else(Uuid::new_v4);
                let account = service.create_account(owner, &client, &float_id).await?;
                println!(
                    "Created account {} for user {} on {}::{}",
                    account.account_id, account.owner_user_id, client, float_id
                );
            }

            Commands::Save {
                account,
                amount,
                currency,
                settled,
                date,
            } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let service = ctx.savings_service();
                let amount = MoneyAmount::new(
                    parse_whole_currency(&amount)?,
                    Unit::HundredthCent,
                    currency,
                );
                let initiation_time = date.as_deref().map(parse_date).transpose()?;
                let settlement_time = settled.then(Utc::now);
                let result = service
                    .record_saving_event(account, amount, initiation_time, settlement_time)
                    .await?;
                println!(
                    "Recorded event {} (float rows {} / {})",
                    result.account_tx_id,
                    result.float_addition_tx_id,
                    result.float_allocation_tx_id
                );
                println!("New balance: {}", result.new_balance);
            }

            Commands::Settle { transaction } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let service = ctx.savings_service();
                let result = service.settle_transaction(transaction).await?;
                println!(
                    "Settled {} at {}; new balance: {}",
                    transaction,
                    result.updated_time.to_rfc3339(),
                    result.new_balance
                );
            }

            Commands::SetStatus {
                transaction,
                status,
            } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let service = ctx.savings_service();
                let new_status = SettlementStatus::from_str(&status)
                    .ok_or_else(|| anyhow::anyhow!("Unknown settlement status '{status}'"))?;
                let updated = service
                    .update_settlement_status(
                        transaction,
                        new_status,
                        serde_json::json!({ "reason": "manual status change" }),
                    )
                    .await?;
                println!("Updated {} to {} at {}", transaction, new_status, updated.to_rfc3339());
            }

            Commands::Balance {
                account,
                currency,
                days,
            } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let projector = ctx.projector();
                let result = projector.project(account, &currency, Utc::now(), days).await?;
                println!("Current balance:   {}", result.current_balance.money());
                println!(
                    "Since {}: {}",
                    result.balance_start_day_or_last_settled.datetime.to_rfc3339(),
                    result.balance_start_day_or_last_settled.money()
                );
                println!("End of today:      {}", result.balance_end_of_today.money());
                for snapshot in &result.balance_subsequent_days {
                    println!(
                        "  {} -> {}",
                        snapshot.datetime.date_naive(),
                        snapshot.money()
                    );
                }
                if !result.pending_transactions.is_empty() {
                    println!("Pending entries:   {}", result.pending_transactions.len());
                }
                println!("Available boosts:  {}", result.available_boost_count);
                println!("Savings heat:      {}", result.savings_heat);
                if let Some(rates) = &result.comparator_rates {
                    println!("Comparator rates:  {rates}");
                }
            }

            Commands::Nightly { out } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let scheduler = ctx.scheduler();
                let outcomes = scheduler.run_nightly().await?;
                for outcome in &outcomes {
                    let accrual = match &outcome.accrual {
                        Ok(accrual) => format!(
                            "accrued {} {}",
                            accrual.accrual_amount, accrual.currency
                        ),
                        Err(err) => format!("accrual FAILED: {err}"),
                    };
                    let recon = match &outcome.reconciliation {
                        Ok(summary) => format!("{:?}", summary.result),
                        Err(err) => format!("reconciliation FAILED: {err}"),
                    };
                    println!(
                        "{}::{} {}; expired {:?} tx, {:?} boosts; {}",
                        outcome.client_id,
                        outcome.float_id,
                        accrual,
                        outcome.expired_transactions,
                        outcome.expired_boosts,
                        recon
                    );
                }
                if let Some(path) = out {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {path}"))?;
                    Exporter::export_nightly_csv(file, &outcomes)?;
                    println!("Run report written to {path}");
                }
            }

            Commands::Check { client, float_id } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let engine = ctx.reconciliation();
                let outcome = engine.check_float(&client, &float_id).await?;
                println!("Result: {:?}", outcome.result);
                for anomaly in &outcome.anomalies {
                    println!("  {}: {}", anomaly.log_type, anomaly.log_context);
                }
            }

            Commands::Logs {
                client,
                float_id,
                out,
            } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let logs = ctx.repo.list_float_logs(&client, &float_id, None).await?;
                for log in &logs {
                    println!(
                        "{} {} {} resolved={}",
                        log.creation_time.to_rfc3339(),
                        log.log_type,
                        log.log_context,
                        log.resolved
                    );
                }
                if let Some(path) = out {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {path}"))?;
                    Exporter::export_anomalies_csv(file, &logs)?;
                    println!("Logs written to {path}");
                }
            }

            Commands::BoostNew {
                account,
                expires_in_hours,
            } => {
                let ctx = AppContext::connect(&self.database, &self.floats).await?;
                let boost = Boost {
                    boost_id: Uuid::new_v4(),
                    account_id: account,
                    boost_status: BoostStatus::Active,
                    expiry_time: Utc::now() + chrono::Duration::hours(expires_in_hours),
                    creation_time: Utc::now(),
                };
                ctx.repo.create_boost(&boost).await?;
                println!("Offered boost {} expiring {}", boost.boost_id, boost.expiry_time);
            }
        }

        Ok(())
    }
}

/// Parse a whole-currency amount string ("50.00", "-12.5") into integer
/// hundredth-cents.
fn parse_whole_currency(input: &str) -> Result<i64> {
    let parsed = Decimal::from_str(input.trim())
        .with_context(|| format!("Invalid amount '{input}'. Use '50.00' or '50'"))?;
    let hundredth_cents = parsed * Decimal::from(Unit::WholeCurrency.factor());
    if !hundredth_cents.fract().is_zero() {
        anyhow::bail!("Amount '{input}' is finer than hundredth-cent precision");
    }
    hundredth_cents
        .to_i64()
        .context("Amount out of range")
}

/// Parse an ISO date (YYYY-MM-DD) as midnight UTC.
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let date = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{date_str}'. Use YYYY-MM-DD"))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}
