use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clients::{Cache, ConfigSource};
use crate::domain::{
    accrue_balance_by_day, end_of_day, interpolate_current_balance, project_subsequent_days,
    reference_rate_bps, round_money, start_of_day, AccountId, AccountTransaction,
    BalanceSnapshot,
};
use crate::storage::Repository;

use super::AppError;

/// How long cached savings-heat and boost-count figures live.
const SIDELINE_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Trailing window the savings-heat score is computed over.
const HEAT_WINDOW_DAYS: i64 = 30;

/// A user's balance as displayed: the settled starting point, today's
/// interpolated figure, the end-of-day estimate, forward projections, and
/// the sidecar figures the home screen shows next to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResult {
    pub account_id: AccountId,
    pub balance_start_day_or_last_settled: BalanceSnapshot,
    pub balance_end_of_today: BalanceSnapshot,
    pub current_balance: BalanceSnapshot,
    pub balance_subsequent_days: Vec<BalanceSnapshot>,
    pub pending_transactions: Vec<AccountTransaction>,
    pub available_boost_count: i64,
    pub savings_heat: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator_rates: Option<serde_json::Value>,
}

/// Combines the balance aggregation with the net daily accrual rate to
/// produce a user's current balance and forward projections.
pub struct BalanceProjector {
    repo: Arc<Repository>,
    config_source: Arc<dyn ConfigSource>,
    cache: Arc<dyn Cache>,
}

impl BalanceProjector {
    pub fn new(
        repo: Arc<Repository>,
        config_source: Arc<dyn ConfigSource>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            repo,
            config_source,
            cache,
        }
    }

    /// Project an account's balance as of a moment.
    ///
    /// The settled balance grows linearly from the later of midnight and the
    /// last settlement towards the end-of-day figure, which applies exactly
    /// one full day of the net rate. At the end-of-day boundary the
    /// interpolated figure equals the end-of-day figure exactly. Further
    /// days compound one net day at a time.
    pub async fn project(
        &self,
        account_id: AccountId,
        currency: &str,
        as_of: DateTime<Utc>,
        days_to_project: u32,
    ) -> Result<BalanceResult, AppError> {
        let account = self
            .repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;
        let config = self
            .config_source
            .float_config(&account.client_id, &account.float_id)
            .await?
            .ok_or_else(|| AppError::ConfigurationMissing {
                client_id: account.client_id.clone(),
                float_id: account.float_id.clone(),
            })?;

        let starting = self
            .repo
            .sum_account_balance(account_id, currency, as_of)
            .await?;
        let starting_amount = starting.amount.amount;

        // if a settlement already landed today, the projection restarts from
        // that instant rather than from midnight
        let start_of_today = start_of_day(as_of);
        let start_time = match starting.last_settled_time {
            Some(last_settled) if start_of_today < last_settled => last_settled,
            _ => start_of_today,
        };
        let end_of_day_time = end_of_day(as_of);

        let end_balance = accrue_balance_by_day(Decimal::from(starting_amount), &config);
        let current_amount = interpolate_current_balance(
            starting_amount,
            end_balance,
            start_time,
            end_of_day_time,
            as_of,
        );

        let pending_transactions = self
            .repo
            .pending_account_transactions(account_id, currency)
            .await?;
        let available_boost_count = self.boost_count_cached(account_id, as_of).await;
        let savings_heat = self.savings_heat_cached(account_id, as_of).await;

        let comparator_rates = config.comparator_rates.as_ref().map(|rates| {
            let mut merged = serde_json::Map::new();
            merged.insert(
                "reference_rate".to_string(),
                serde_json::json!(reference_rate_bps(&config)),
            );
            if let serde_json::Value::Object(given) = rates {
                merged.extend(given.clone());
            }
            serde_json::Value::Object(merged)
        });

        Ok(BalanceResult {
            account_id,
            balance_start_day_or_last_settled: BalanceSnapshot::new(
                starting_amount,
                currency,
                start_time,
            ),
            balance_end_of_today: BalanceSnapshot::new(
                round_money(end_balance),
                currency,
                end_of_day_time,
            ),
            current_balance: BalanceSnapshot::new(current_amount, currency, as_of),
            balance_subsequent_days: project_subsequent_days(
                end_balance,
                end_of_day_time,
                currency,
                &config,
                days_to_project,
            ),
            pending_transactions,
            available_boost_count,
            savings_heat,
            comparator_rates,
        })
    }

    /// Available-boost count, cache first. Cache trouble is a miss, never a
    /// failure of the balance request.
    async fn boost_count_cached(&self, account_id: AccountId, as_of: DateTime<Utc>) -> i64 {
        let key = format!("boost_count::{account_id}");
        if let Some(count) = self.cached_value::<i64>(&key).await {
            return count;
        }
        let count = match self.repo.available_boost_count(account_id, as_of).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(%account_id, error = %err, "boost count unavailable");
                return 0;
            }
        };
        self.store_cached(&key, &count.to_string()).await;
        count
    }

    /// Savings heat: settled saves over the trailing window, two decimal
    /// places, cache first.
    async fn savings_heat_cached(&self, account_id: AccountId, as_of: DateTime<Utc>) -> Decimal {
        let key = format!("savings_heat::{account_id}");
        if let Some(heat) = self.cached_value::<Decimal>(&key).await {
            return heat;
        }
        let since = as_of - chrono::Duration::days(HEAT_WINDOW_DAYS);
        let saves = match self.repo.settled_save_count_since(account_id, since).await {
            Ok(saves) => saves,
            Err(err) => {
                tracing::warn!(%account_id, error = %err, "savings heat unavailable");
                return Decimal::ZERO;
            }
        };
        let heat = Decimal::from(saves).round_dp(2);
        self.store_cached(&key, &heat.to_string()).await;
        heat
    }

    async fn cached_value<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => raw.parse().ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed, recomputing");
                None
            }
        }
    }

    async fn store_cached(&self, key: &str, value: &str) {
        if let Err(err) = self.cache.set(key, value, SIDELINE_CACHE_TTL).await {
            tracing::warn!(key, error = %err, "cache write failed");
        }
    }
}
