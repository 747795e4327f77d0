use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::clients::{AccrualDistributor, ConfigSource, EventPublisher};
use crate::domain::{
    gross_accrual, AccrualInstruction, AllocatedToType, BackingEntityType, FloatConfig, FloatLog,
    FloatLogType, FloatTransaction, MoneyAmount, SettlementStatus, TransactionType, Unit,
};
use crate::storage::Repository;

use super::{AppError, ReconciliationEngine, ReconciliationResult};

/// Hanging (initiated/pending) entries older than this many days are expired
/// by the nightly sweep.
pub const DEFAULT_EXPIRY_DAYS_BACK: i64 = 3;

/// What one float's nightly run produced. Steps report independently; a
/// failed step never hides the others' results, and one float's failure
/// never aborts another float's task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatRunOutcome {
    pub client_id: String,
    pub float_id: String,
    pub accrual: Result<AccrualOutcome, String>,
    pub expired_transactions: Result<usize, String>,
    pub expired_boosts: Result<usize, String>,
    pub reconciliation: Result<ReconciliationSummary, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualOutcome {
    pub accrual_amount: i64,
    pub currency: String,
    pub backing_entity_identifier: Option<String>,
    pub distributed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub result: ReconciliationResult,
    pub anomaly_count: usize,
}

/// Top-level composition: fans the nightly work out across floats. Tasks for
/// different floats run concurrently and independently; within one float the
/// steps run in order, and the accrual log is durably written before the
/// task moves on, so the next run reads a consistent last-accrual time.
#[derive(Clone)]
pub struct SchedulerDriver {
    repo: Arc<Repository>,
    config_source: Arc<dyn ConfigSource>,
    distributor: Arc<dyn AccrualDistributor>,
    publisher: Arc<dyn EventPublisher>,
    reconciliation: Arc<ReconciliationEngine>,
    expiry_days_back: i64,
}

impl SchedulerDriver {
    pub fn new(
        repo: Arc<Repository>,
        config_source: Arc<dyn ConfigSource>,
        distributor: Arc<dyn AccrualDistributor>,
        publisher: Arc<dyn EventPublisher>,
        reconciliation: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            repo,
            config_source,
            distributor,
            publisher,
            reconciliation,
            expiry_days_back: DEFAULT_EXPIRY_DAYS_BACK,
        }
    }

    pub fn with_expiry_days_back(mut self, days: i64) -> Self {
        self.expiry_days_back = days;
        self
    }

    /// Run the nightly batch over every configured float. Returns one
    /// outcome per float, in stable (client, float) order.
    pub async fn run_nightly(&self) -> Result<Vec<FloatRunOutcome>, AppError> {
        let floats = self.config_source.list_client_floats().await?;
        tracing::info!(float_count = floats.len(), "starting nightly run");

        let mut tasks = JoinSet::new();
        for config in floats {
            let driver = self.clone();
            tasks.spawn(async move { driver.run_float(config).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(error = %err, "nightly float task panicked"),
            }
        }
        outcomes.sort_by(|a, b| {
            (&a.client_id, &a.float_id).cmp(&(&b.client_id, &b.float_id))
        });
        Ok(outcomes)
    }

    /// One float's nightly steps: accrue, expire hanging entries, expire
    /// boosts, reconcile. Each step's failure is captured in the outcome
    /// rather than propagated.
    async fn run_float(&self, config: FloatConfig) -> FloatRunOutcome {
        let client_id = config.client_id.clone();
        let float_id = config.float_id.clone();

        let accrual = self
            .process_accrual(&config)
            .await
            .map_err(|err| err.to_string());
        if let Err(error) = &accrual {
            tracing::warn!(%client_id, %float_id, %error, "accrual step failed");
        }

        let cutoff = Utc::now() - Duration::days(self.expiry_days_back);
        let expired_transactions = self
            .repo
            .expire_hanging_transactions(&client_id, &float_id, cutoff)
            .await
            .map(|expired| expired.len())
            .map_err(|err| err.to_string());

        let expired_boosts = self
            .expire_boosts(&client_id, &float_id)
            .await
            .map_err(|err| err.to_string());

        let reconciliation = self
            .reconciliation
            .check_float(&client_id, &float_id)
            .await
            .map(|outcome| ReconciliationSummary {
                result: outcome.result,
                anomaly_count: outcome.anomalies.len(),
            })
            .map_err(|err| err.to_string());

        FloatRunOutcome {
            client_id,
            float_id,
            accrual,
            expired_transactions,
            expired_boosts,
            reconciliation,
        }
    }

    /// Compute the float's gross accrual since the last run, hand it to the
    /// distributor, and on success durably record the accrual entry and its
    /// whole-float accrual log in one transaction.
    async fn process_accrual(&self, config: &FloatConfig) -> Result<AccrualOutcome, AppError> {
        let balances = self
            .repo
            .float_balance_and_flows(&[config.float_id.clone()], None, None)
            .await?;
        let float_balance = balances
            .get(&config.float_id)
            .and_then(|currencies| currencies.get(&config.currency))
            .map(|amount| amount.equalized())
            .unwrap_or(0);

        let Some(last_accrual_time) = self
            .repo
            .last_float_accrual_time(&config.client_id, &config.float_id)
            .await?
        else {
            // a float with no history has nothing to accrue from yet
            tracing::warn!(
                client_id = %config.client_id,
                float_id = %config.float_id,
                "no accrual basis, skipping"
            );
            return Ok(AccrualOutcome {
                accrual_amount: 0,
                currency: config.currency.clone(),
                backing_entity_identifier: None,
                distributed: false,
            });
        };

        let now = Utc::now();
        let millis_since_last = (now - last_accrual_time).num_milliseconds();
        let (accrual_amount, basis) = gross_accrual(
            float_balance,
            config.accrual_rate_annual_bps,
            millis_since_last,
        );

        let backing_entity_identifier =
            format!("SYSTEM_CALC_DAILY_{}", now.timestamp_millis());
        let instruction = AccrualInstruction {
            client_id: config.client_id.clone(),
            float_id: config.float_id.clone(),
            accrual_amount,
            currency: config.currency.clone(),
            unit: Unit::HundredthCent,
            reference_time_millis: now.timestamp_millis(),
            backing_entity_identifier: backing_entity_identifier.clone(),
            calculation_basis: basis.clone(),
        };

        let distribution = self.distributor.distribute(&instruction).await?;
        tracing::info!(
            client_id = %config.client_id,
            float_id = %config.float_id,
            accrual_amount,
            user_allocations = distribution.user_allocation_count,
            "accrual distributed"
        );

        // the zero-amount case writes the log alone, so the reference time
        // still advances instead of accruing the gap twice later
        let accrual_tx = (accrual_amount != 0).then(|| FloatTransaction {
            transaction_id: Uuid::new_v4(),
            client_id: config.client_id.clone(),
            float_id: config.float_id.clone(),
            transaction_type: TransactionType::Accrual,
            amount: MoneyAmount::new(accrual_amount, Unit::HundredthCent, &config.currency),
            allocated_to_type: AllocatedToType::FloatItself,
            allocated_to_id: config.float_id.clone(),
            settlement_state: SettlementStatus::Settled,
            related_entity_type: Some(BackingEntityType::AccrualEvent),
            related_entity_id: Some(backing_entity_identifier.clone()),
            creation_time: now,
        });
        let log = FloatLog {
            log_id: Uuid::new_v4(),
            client_id: config.client_id.clone(),
            float_id: config.float_id.clone(),
            log_type: FloatLogType::WholeFloatAccrual,
            log_context: serde_json::json!({
                "accrual_amount": accrual_amount,
                "currency": config.currency,
                "calculation_basis": basis,
                "backing_entity_identifier": backing_entity_identifier,
            }),
            reference_time: now,
            creation_time: now,
            resolved: false,
        };
        self.repo
            .record_whole_float_accrual(accrual_tx.as_ref(), &log)
            .await?;

        Ok(AccrualOutcome {
            accrual_amount,
            currency: config.currency.clone(),
            backing_entity_identifier: Some(backing_entity_identifier),
            distributed: true,
        })
    }

    /// Expire elapsed boosts on the float's accounts and tell each affected
    /// user, fire-and-forget.
    async fn expire_boosts(&self, client_id: &str, float_id: &str) -> Result<usize, AppError> {
        let expired = self
            .repo
            .expire_boosts(client_id, float_id, Utc::now())
            .await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let account_ids: Vec<_> = expired.iter().map(|(_, account_id)| *account_id).collect();
        let owners = self.repo.account_owner_user_ids(&account_ids).await?;
        for (boost_id, account_id) in &expired {
            if let Some(user_id) = owners.get(account_id) {
                self.publisher
                    .publish(
                        *user_id,
                        "BOOST_EXPIRED",
                        serde_json::json!({ "boost_id": boost_id }),
                    )
                    .await;
            }
        }
        Ok(expired.len())
    }
}
