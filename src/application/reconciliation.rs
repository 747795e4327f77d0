use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{FloatLog, FloatLogType, MoneyAmount};
use crate::storage::Repository;

use super::AppError;

/// Anomalies of the same type for the same client-float pair are suppressed
/// for this long after one is logged.
const DEDUP_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationResult {
    NoAnomalies,
    AnomaliesFound,
}

/// Outcome of one float's reconciliation check. `anomalies` holds the log
/// rows actually inserted; candidates suppressed by the dedup window do not
/// appear and do not flip the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub result: ReconciliationResult,
    pub anomalies: Vec<FloatLog>,
}

/// Compares independently derived totals for a float and records anomalies
/// for human review. Nothing is ever auto-corrected here.
pub struct ReconciliationEngine {
    repo: Arc<Repository>,
    /// Serialises concurrent checks per float, so two overlapping runs
    /// cannot both pass the dedup read and double-log the same anomaly.
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl ReconciliationEngine {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Check one float for bookkeeping drift.
    ///
    /// Two comparisons, each per currency over the union of currencies seen
    /// on either side (a currency absent from one side counts as zero):
    /// the float's own balance against the total allocated away from it, and
    /// the total allocated to end-user accounts against the settled
    /// account-side ledger. Non-zero differences become float log rows,
    /// unless an anomaly of the same type was already logged for this float
    /// within the last 24 hours.
    pub async fn check_float(
        &self,
        client_id: &str,
        float_id: &str,
    ) -> Result<ReconciliationOutcome, AppError> {
        let float_lock = self.float_lock(client_id, float_id).await;
        let _guard = float_lock.lock().await;

        let mut balance_map = self
            .repo
            .float_balance_and_flows(&[float_id.to_string()], None, None)
            .await?;
        let float_balances = balance_map.remove(float_id).unwrap_or_default();
        let float_allocations = self.repo.float_allocated_total(client_id, float_id).await?;

        let mut candidates: Vec<(FloatLogType, serde_json::Value)> = Vec::new();
        for currency in currency_union(&float_balances, &float_allocations) {
            if let Some(context) = compare_in_currency(
                &float_balances,
                "float_balance",
                &float_allocations,
                "float_allocations",
                &currency,
            ) {
                candidates.push((FloatLogType::BalanceMismatch, context));
            }
        }

        let (user_allocations, account_totals) = self
            .repo
            .user_allocations_and_account_totals(client_id, float_id)
            .await?;
        for currency in currency_union(&user_allocations, &account_totals) {
            if let Some(context) = compare_in_currency(
                &user_allocations,
                "float_accounts_total",
                &account_totals,
                "accounts_tx_total",
                &currency,
            ) {
                candidates.push((FloatLogType::AllocationTotalMismatch, context));
            }
        }

        // drop candidates whose type was already logged inside the window;
        // the dedup key is the log type alone, magnitude is ignored
        let window_start = Utc::now() - Duration::hours(DEDUP_WINDOW_HOURS);
        let already_logged = self
            .repo
            .recent_log_types(
                client_id,
                float_id,
                &[
                    FloatLogType::BalanceMismatch,
                    FloatLogType::AllocationTotalMismatch,
                ],
                window_start,
            )
            .await?;

        let mut inserted = Vec::new();
        for (log_type, log_context) in candidates {
            if already_logged.contains(&log_type) {
                tracing::debug!(client_id, float_id, %log_type, "anomaly suppressed by dedup window");
                continue;
            }
            let now = Utc::now();
            let log = FloatLog {
                log_id: Uuid::new_v4(),
                client_id: client_id.to_string(),
                float_id: float_id.to_string(),
                log_type,
                log_context,
                reference_time: now,
                creation_time: now,
                resolved: false,
            };
            self.repo.insert_float_log(&log).await?;
            tracing::warn!(client_id, float_id, %log_type, context = %log.log_context, "recorded anomaly");
            inserted.push(log);
        }

        let result = if inserted.is_empty() {
            ReconciliationResult::NoAnomalies
        } else {
            ReconciliationResult::AnomaliesFound
        };
        Ok(ReconciliationOutcome {
            result,
            anomalies: inserted,
        })
    }

    async fn float_lock(&self, client_id: &str, float_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((client_id.to_string(), float_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Currencies present on either side, in stable order.
fn currency_union(
    side_a: &HashMap<String, MoneyAmount>,
    side_b: &HashMap<String, MoneyAmount>,
) -> BTreeSet<String> {
    side_a.keys().chain(side_b.keys()).cloned().collect()
}

/// Compare the two sides in one currency, both standardised to
/// hundredth-cents; a missing side is a zero of that currency. `None` when
/// they agree.
fn compare_in_currency(
    side_a: &HashMap<String, MoneyAmount>,
    label_a: &str,
    side_b: &HashMap<String, MoneyAmount>,
    label_b: &str,
    currency: &str,
) -> Option<serde_json::Value> {
    let equalized_a = side_a.get(currency).map(|m| m.equalized()).unwrap_or(0);
    let equalized_b = side_b.get(currency).map(|m| m.equalized()).unwrap_or(0);
    if equalized_a == equalized_b {
        return None;
    }
    Some(serde_json::json!({
        "mismatch": equalized_a - equalized_b,
        label_a: equalized_a,
        label_b: equalized_b,
        "currency": currency,
        "unit": "HUNDREDTH_CENT",
    }))
}
