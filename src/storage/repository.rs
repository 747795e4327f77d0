use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    standardize_unit_sums, Account, AccountBalance, AccountId, AccountTransaction,
    AllocatedToType, BackingEntityType, Boost, BoostId, FloatLog, FloatLogType,
    FloatTransaction, FlowSign, MoneyAmount, SettlementStatus, TransactionId, TransactionLog,
    TransactionType, Unit,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_LOGS_BOOSTS};

/// Per-float, per-currency balances in the canonical unit.
pub type FloatBalanceMap = HashMap<String, HashMap<String, MoneyAmount>>;

/// Per-float, per-allocated-entity, per-currency balances.
pub type AllocatedBalanceMap = HashMap<String, HashMap<String, HashMap<String, MoneyAmount>>>;

/// Repository for the pooled-float ledger: accounts, the two transaction
/// tables, float logs and boosts. The only code in the crate that speaks SQL.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        for (name, sql) in [
            ("001", MIGRATION_001_INITIAL),
            ("002", MIGRATION_002_LOGS_BOOSTS),
        ] {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to run migration {name}"))?;
        }
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account.
    pub async fn create_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, owner_user_id, client_id, float_id, creation_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.account_id.to_string())
        .bind(account.owner_user_id.to_string())
        .bind(&account.client_id)
        .bind(&account.float_id)
        .bind(account.creation_time.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Resolve an account to its owner, client and float.
    pub async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT account_id, owner_user_id, client_id, float_id, creation_time FROM accounts WHERE account_id = ?",
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    /// Map account ids to their owning user ids (for event publication).
    pub async fn account_owner_user_ids(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, Uuid>> {
        let mut owners = HashMap::new();
        for chunk in account_ids.chunks(100) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query = format!(
                "SELECT account_id, owner_user_id FROM accounts WHERE account_id IN ({placeholders})"
            );
            let mut sql_query = sqlx::query(&query);
            for id in chunk {
                sql_query = sql_query.bind(id.to_string());
            }
            let rows = sql_query
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch account owners")?;
            for row in rows {
                let account_id: String = row.get("account_id");
                let owner: String = row.get("owner_user_id");
                owners.insert(
                    Uuid::parse_str(&account_id).context("Invalid account ID")?,
                    Uuid::parse_str(&owner).context("Invalid owner user ID")?,
                );
            }
        }
        Ok(owners)
    }

    // ========================
    // Saving events
    // ========================

    /// Insert the three rows of a saving event in a single transaction:
    /// the account entry, the float addition and the end-user allocation.
    /// Any failure rolls the whole event back; partial writes are never
    /// observable.
    pub async fn insert_saving_event(
        &self,
        account_tx: &AccountTransaction,
        float_addition: &FloatTransaction,
        float_allocation: &FloatTransaction,
    ) -> Result<()> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin saving-event transaction")?;

        Self::bind_account_tx_insert(account_tx)
            .execute(&mut *db_tx)
            .await
            .context("Failed to insert account transaction")?;

        for float_tx in [float_addition, float_allocation] {
            Self::bind_float_tx_insert(float_tx)
                .execute(&mut *db_tx)
                .await
                .context("Failed to insert float transaction")?;
        }

        db_tx
            .commit()
            .await
            .context("Failed to commit saving event")?;
        Ok(())
    }

    /// Get an account-side ledger entry by ID.
    pub async fn get_account_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<AccountTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT transaction_id, account_id, transaction_type, currency, unit, amount,
                   float_id, client_id, settlement_status, initiation_time, settlement_time,
                   creation_time, float_adjust_tx_id, float_alloc_tx_id
            FROM account_transactions
            WHERE transaction_id = ?
            "#,
        )
        .bind(transaction_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account transaction")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account_tx(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a float-side ledger entry by ID.
    pub async fn get_float_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<FloatTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT transaction_id, client_id, float_id, t_type, currency, unit, amount,
                   allocated_to_type, allocated_to_id, t_state, related_entity_type,
                   related_entity_id, creation_time
            FROM float_transactions
            WHERE transaction_id = ?
            "#,
        )
        .bind(transaction_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch float transaction")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_float_tx(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a validated settlement-status change. Updates the account row
    /// (guarded on the status it was validated against), carries the new
    /// state onto the event's float rows, and records an audit log row, all
    /// in one transaction. Returns the update time.
    pub async fn apply_settlement_update(
        &self,
        transaction_id: TransactionId,
        expected_current: SettlementStatus,
        new_status: SettlementStatus,
        settlement_time: Option<DateTime<Utc>>,
        log_context: serde_json::Value,
    ) -> Result<DateTime<Utc>> {
        let updated_time = Utc::now();
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin settlement update")?;

        let update_result = sqlx::query(
            r#"
            UPDATE account_transactions
            SET settlement_status = ?, settlement_time = COALESCE(?, settlement_time)
            WHERE transaction_id = ? AND settlement_status = ?
            "#,
        )
        .bind(new_status.as_str())
        .bind(settlement_time.map(|t| t.to_rfc3339()))
        .bind(transaction_id.to_string())
        .bind(expected_current.as_str())
        .execute(&mut *db_tx)
        .await
        .context("Failed to update settlement status")?;

        if update_result.rows_affected() == 0 {
            anyhow::bail!("Settlement status changed concurrently for {transaction_id}");
        }

        sqlx::query(
            "UPDATE float_transactions SET t_state = ? WHERE related_entity_id = ?",
        )
        .bind(new_status.as_str())
        .bind(transaction_id.to_string())
        .execute(&mut *db_tx)
        .await
        .context("Failed to update float transaction state")?;

        sqlx::query(
            r#"
            INSERT INTO transaction_logs (log_id, transaction_id, log_type, log_context, creation_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(transaction_id.to_string())
        .bind(format!("STATUS_CHANGED_TO_{}", new_status.as_str()))
        .bind(log_context.to_string())
        .bind(updated_time.to_rfc3339())
        .execute(&mut *db_tx)
        .await
        .context("Failed to insert transaction log")?;

        db_tx
            .commit()
            .await
            .context("Failed to commit settlement update")?;
        Ok(updated_time)
    }

    /// Audit rows recorded against a ledger entry.
    pub async fn transaction_logs(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<TransactionLog>> {
        let rows = sqlx::query(
            r#"
            SELECT log_id, transaction_id, log_type, log_context, creation_time
            FROM transaction_logs
            WHERE transaction_id = ?
            ORDER BY creation_time
            "#,
        )
        .bind(transaction_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch transaction logs")?;

        rows.iter()
            .map(|row| {
                let context_str: String = row.get("log_context");
                Ok(TransactionLog {
                    log_id: Self::parse_uuid(row, "log_id")?,
                    transaction_id: Self::parse_uuid(row, "transaction_id")?,
                    log_type: row.get("log_type"),
                    log_context: serde_json::from_str(&context_str)
                        .context("Invalid transaction log context")?,
                    creation_time: Self::parse_time(row, "creation_time")?,
                })
            })
            .collect()
    }

    /// Un-settled (initiated or pending) entries for an account.
    pub async fn pending_account_transactions(
        &self,
        account_id: AccountId,
        currency: &str,
    ) -> Result<Vec<AccountTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, account_id, transaction_type, currency, unit, amount,
                   float_id, client_id, settlement_status, initiation_time, settlement_time,
                   creation_time, float_adjust_tx_id, float_alloc_tx_id
            FROM account_transactions
            WHERE account_id = ? AND currency = ? AND settlement_status IN ('INITIATED', 'PENDING')
            ORDER BY creation_time
            "#,
        )
        .bind(account_id.to_string())
        .bind(currency)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending transactions")?;

        rows.iter().map(Self::row_to_account_tx).collect()
    }

    /// All entries for an account, newest first.
    pub async fn list_account_transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<AccountTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, account_id, transaction_type, currency, unit, amount,
                   float_id, client_id, settlement_status, initiation_time, settlement_time,
                   creation_time, float_adjust_tx_id, float_alloc_tx_id
            FROM account_transactions
            WHERE account_id = ?
            ORDER BY creation_time DESC
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list account transactions")?;

        rows.iter().map(Self::row_to_account_tx).collect()
    }

    // ========================
    // Balance aggregation
    // ========================

    /// Sum an account's settled, balance-relevant entries as of a moment.
    /// Groups by stored unit, standardises each group to hundredth-cents,
    /// then sums; returns an explicit zero when no rows match. Also reports
    /// the creation time of the most recent settled entry contributing to
    /// the sum.
    pub async fn sum_account_balance(
        &self,
        account_id: AccountId,
        currency: &str,
        as_of: DateTime<Utc>,
    ) -> Result<AccountBalance> {
        let rows = sqlx::query(
            r#"
            SELECT unit, SUM(amount) AS total
            FROM account_transactions
            WHERE account_id = ? AND currency = ? AND settlement_status = 'SETTLED'
              AND creation_time < ?
              AND transaction_type IN ('USER_SAVING_EVENT', 'ACCRUAL', 'CAPITALIZATION', 'WITHDRAWAL')
            GROUP BY unit
            "#,
        )
        .bind(account_id.to_string())
        .bind(currency)
        .bind(as_of.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum account balance")?;

        let unit_sums = rows
            .iter()
            .map(|row| Self::parse_unit_sum(row))
            .collect::<Result<Vec<_>>>()?;
        let amount = standardize_unit_sums(currency, &unit_sums);

        let last_settled = sqlx::query(
            r#"
            SELECT creation_time
            FROM account_transactions
            WHERE account_id = ? AND currency = ? AND settlement_status = 'SETTLED'
              AND creation_time < ?
            ORDER BY creation_time DESC
            LIMIT 1
            "#,
        )
        .bind(account_id.to_string())
        .bind(currency)
        .bind(as_of.to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch last settled time")?;

        let last_settled_time = last_settled
            .map(|row| Self::parse_time(&row, "creation_time"))
            .transpose()?;

        Ok(AccountBalance {
            amount,
            last_settled_time,
        })
    }

    /// Settled additions to the floats themselves (allocated-to FLOAT_ITSELF),
    /// per float and currency, optionally restricted to a time window.
    pub async fn float_balance_and_flows(
        &self,
        float_ids: &[String],
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<FloatBalanceMap> {
        if float_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; float_ids.len()].join(", ");
        let query = format!(
            r#"
            SELECT float_id, currency, unit, SUM(amount) AS total
            FROM float_transactions
            WHERE allocated_to_type = 'FLOAT_ITSELF' AND t_state = 'SETTLED'
              AND creation_time >= ? AND creation_time < ?
              AND float_id IN ({placeholders})
            GROUP BY float_id, currency, unit
            "#
        );

        let mut sql_query = sqlx::query(&query)
            .bind(Self::window_start(window_start))
            .bind(Self::window_end(window_end));
        for float_id in float_ids {
            sql_query = sql_query.bind(float_id);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to sum float balances")?;

        let mut result: FloatBalanceMap = HashMap::new();
        for float_id in float_ids {
            result.entry(float_id.clone()).or_default();
        }
        for row in &rows {
            let float_id: String = row.get("float_id");
            let currency: String = row.get("currency");
            let (unit, sum) = Self::parse_unit_sum(row)?;
            let entry = result
                .entry(float_id)
                .or_default()
                .entry(currency.clone())
                .or_insert_with(|| MoneyAmount::zero(&currency));
            entry.amount += crate::domain::convert_amount(sum, unit, Unit::HundredthCent);
        }
        Ok(result)
    }

    /// Everything settled and allocated away from the float itself, per
    /// currency, for one client-float pair.
    pub async fn float_allocated_total(
        &self,
        client_id: &str,
        float_id: &str,
    ) -> Result<HashMap<String, MoneyAmount>> {
        let rows = sqlx::query(
            r#"
            SELECT currency, unit, SUM(amount) AS total
            FROM float_transactions
            WHERE allocated_to_type != 'FLOAT_ITSELF' AND t_state = 'SETTLED'
              AND client_id = ? AND float_id = ?
            GROUP BY currency, unit
            "#,
        )
        .bind(client_id)
        .bind(float_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum float allocations")?;

        Self::currency_totals(&rows)
    }

    /// Settled bonus-pool flows per float, allocated entity and currency.
    /// The sign filter restricts to outflows (amount < 0), inflows
    /// (amount > 0), or keeps both.
    pub async fn bonus_pool_balance_and_flows(
        &self,
        float_ids: &[String],
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
        sign: FlowSign,
    ) -> Result<AllocatedBalanceMap> {
        if float_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sign_clause = match sign {
            FlowSign::Outflow => "AND amount < 0",
            FlowSign::Inflow => "AND amount > 0",
            FlowSign::Both => "",
        };
        let placeholders = vec!["?"; float_ids.len()].join(", ");
        let query = format!(
            r#"
            SELECT float_id, allocated_to_id, currency, unit, SUM(amount) AS total
            FROM float_transactions
            WHERE allocated_to_type = 'BONUS_POOL' AND t_state = 'SETTLED'
              AND creation_time >= ? AND creation_time < ?
              {sign_clause}
              AND float_id IN ({placeholders})
            GROUP BY float_id, allocated_to_id, currency, unit
            "#
        );

        let mut sql_query = sqlx::query(&query)
            .bind(Self::window_start(window_start))
            .bind(Self::window_end(window_end));
        for float_id in float_ids {
            sql_query = sql_query.bind(float_id);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to sum bonus pool flows")?;

        let mut result: AllocatedBalanceMap = HashMap::new();
        for row in &rows {
            let float_id: String = row.get("float_id");
            let allocated_to: String = row.get("allocated_to_id");
            let currency: String = row.get("currency");
            let (unit, sum) = Self::parse_unit_sum(row)?;
            let entry = result
                .entry(float_id)
                .or_default()
                .entry(allocated_to)
                .or_default()
                .entry(currency.clone())
                .or_insert_with(|| MoneyAmount::zero(&currency));
            entry.amount += crate::domain::convert_amount(sum, unit, Unit::HundredthCent);
        }
        Ok(result)
    }

    /// The two sides of the user-allocation comparison: what the float has
    /// allocated to end-user accounts, and what the account-side ledger has
    /// settled, per currency.
    pub async fn user_allocations_and_account_totals(
        &self,
        client_id: &str,
        float_id: &str,
    ) -> Result<(HashMap<String, MoneyAmount>, HashMap<String, MoneyAmount>)> {
        let float_rows = sqlx::query(
            r#"
            SELECT currency, unit, SUM(amount) AS total
            FROM float_transactions
            WHERE allocated_to_type = 'END_USER_ACCOUNT' AND t_state = 'SETTLED'
              AND client_id = ? AND float_id = ?
            GROUP BY currency, unit
            "#,
        )
        .bind(client_id)
        .bind(float_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum user allocations")?;

        let account_rows = sqlx::query(
            r#"
            SELECT currency, unit, SUM(amount) AS total
            FROM account_transactions
            WHERE settlement_status = 'SETTLED' AND client_id = ? AND float_id = ?
            GROUP BY currency, unit
            "#,
        )
        .bind(client_id)
        .bind(float_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum account transactions")?;

        Ok((
            Self::currency_totals(&float_rows)?,
            Self::currency_totals(&account_rows)?,
        ))
    }

    // ========================
    // Float logs and accrual
    // ========================

    /// The reference time accrual should resume from: the most recent
    /// whole-float accrual log, or failing that the creation time of the
    /// float's first addition. `None` for a float with no history at all.
    pub async fn last_float_accrual_time(
        &self,
        client_id: &str,
        float_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let log_row = sqlx::query(
            r#"
            SELECT reference_time
            FROM float_logs
            WHERE client_id = ? AND float_id = ? AND log_type = 'WHOLE_FLOAT_ACCRUAL'
            ORDER BY creation_time DESC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(float_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch last accrual log")?;

        if let Some(row) = log_row {
            return Ok(Some(Self::parse_time(&row, "reference_time")?));
        }

        // no accrual yet: fall back to the first time money entered the float
        let first_tx = sqlx::query(
            r#"
            SELECT creation_time
            FROM float_transactions
            WHERE client_id = ? AND float_id = ? AND allocated_to_type = 'FLOAT_ITSELF'
            ORDER BY creation_time ASC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(float_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch first float transaction")?;

        first_tx
            .map(|row| Self::parse_time(&row, "creation_time"))
            .transpose()
    }

    /// Durably record a whole-float accrual: the float-side accrual entry
    /// (absent for a zero-amount accrual, whose log still advances the
    /// reference time) and the accrual log the next run reads, in one
    /// transaction.
    pub async fn record_whole_float_accrual(
        &self,
        accrual_tx: Option<&FloatTransaction>,
        log: &FloatLog,
    ) -> Result<()> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin accrual transaction")?;

        if let Some(accrual_tx) = accrual_tx {
            Self::bind_float_tx_insert(accrual_tx)
                .execute(&mut *db_tx)
                .await
                .context("Failed to insert accrual transaction")?;
        }

        Self::bind_float_log_insert(log)
            .execute(&mut *db_tx)
            .await
            .context("Failed to insert accrual log")?;

        db_tx.commit().await.context("Failed to commit accrual")?;
        Ok(())
    }

    /// Insert a float log row.
    pub async fn insert_float_log(&self, log: &FloatLog) -> Result<()> {
        Self::bind_float_log_insert(log)
            .execute(&self.pool)
            .await
            .context("Failed to insert float log")?;
        Ok(())
    }

    /// Log types already recorded for this client-float pair since the given
    /// moment; the reconciliation dedup window reads this.
    pub async fn recent_log_types(
        &self,
        client_id: &str,
        float_id: &str,
        log_types: &[FloatLogType],
        since: DateTime<Utc>,
    ) -> Result<HashSet<FloatLogType>> {
        if log_types.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = vec!["?"; log_types.len()].join(", ");
        let query = format!(
            r#"
            SELECT DISTINCT log_type
            FROM float_logs
            WHERE client_id = ? AND float_id = ? AND creation_time >= ?
              AND log_type IN ({placeholders})
            "#
        );

        let mut sql_query = sqlx::query(&query)
            .bind(client_id)
            .bind(float_id)
            .bind(since.to_rfc3339());
        for log_type in log_types {
            sql_query = sql_query.bind(log_type.as_str());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch recent log types")?;

        Ok(rows
            .iter()
            .filter_map(|row| FloatLogType::from_str(row.get("log_type")))
            .collect())
    }

    /// Float logs for a client-float pair, newest first, optionally
    /// restricted to given types.
    pub async fn list_float_logs(
        &self,
        client_id: &str,
        float_id: &str,
        log_types: Option<&[FloatLogType]>,
    ) -> Result<Vec<FloatLog>> {
        let type_clause = match log_types {
            Some(types) => format!(
                "AND log_type IN ({})",
                vec!["?"; types.len()].join(", ")
            ),
            None => String::new(),
        };
        let query = format!(
            r#"
            SELECT log_id, client_id, float_id, log_type, log_context, reference_time,
                   creation_time, resolved
            FROM float_logs
            WHERE client_id = ? AND float_id = ? {type_clause}
            ORDER BY creation_time DESC
            "#
        );

        let mut sql_query = sqlx::query(&query).bind(client_id).bind(float_id);
        if let Some(types) = log_types {
            for log_type in types {
                sql_query = sql_query.bind(log_type.as_str());
            }
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list float logs")?;

        rows.iter().map(Self::row_to_float_log).collect()
    }

    // ========================
    // Allocations
    // ========================

    /// Batch-insert float allocation rows (bonus pool, client share,
    /// end-user accounts); all rows commit together or not at all.
    pub async fn allocate_float(&self, rows: &[FloatTransaction]) -> Result<Vec<TransactionId>> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin allocation transaction")?;

        let mut ids = Vec::with_capacity(rows.len());
        for float_tx in rows {
            Self::bind_float_tx_insert(float_tx)
                .execute(&mut *db_tx)
                .await
                .context("Failed to insert allocation")?;
            ids.push(float_tx.transaction_id);
        }

        db_tx
            .commit()
            .await
            .context("Failed to commit allocations")?;
        Ok(ids)
    }

    // ========================
    // Expiry sweeps
    // ========================

    /// Expire hanging (initiated/pending) entries for a float older than the
    /// cutoff; float-side rows follow in the same transaction. Returns the
    /// expired entry ids.
    pub async fn expire_hanging_transactions(
        &self,
        client_id: &str,
        float_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransactionId>> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin expiry sweep")?;

        let rows = sqlx::query(
            r#"
            UPDATE account_transactions
            SET settlement_status = 'EXPIRED'
            WHERE client_id = ? AND float_id = ?
              AND settlement_status IN ('INITIATED', 'PENDING')
              AND creation_time < ?
            RETURNING transaction_id
            "#,
        )
        .bind(client_id)
        .bind(float_id)
        .bind(cutoff.to_rfc3339())
        .fetch_all(&mut *db_tx)
        .await
        .context("Failed to expire hanging transactions")?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = Self::parse_uuid(row, "transaction_id")?;
            sqlx::query(
                "UPDATE float_transactions SET t_state = 'EXPIRED' WHERE related_entity_id = ?",
            )
            .bind(id.to_string())
            .execute(&mut *db_tx)
            .await
            .context("Failed to expire float transactions")?;
            expired.push(id);
        }

        db_tx
            .commit()
            .await
            .context("Failed to commit expiry sweep")?;
        Ok(expired)
    }

    // ========================
    // Boosts
    // ========================

    /// Save a boost offer against an account.
    pub async fn create_boost(&self, boost: &Boost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO boosts (boost_id, account_id, boost_status, expiry_time, creation_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(boost.boost_id.to_string())
        .bind(boost.account_id.to_string())
        .bind(boost.boost_status.as_str())
        .bind(boost.expiry_time.to_rfc3339())
        .bind(boost.creation_time.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save boost")?;
        Ok(())
    }

    /// Count boosts still open for an account.
    pub async fn available_boost_count(
        &self,
        account_id: AccountId,
        as_of: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM boosts
            WHERE account_id = ? AND boost_status = 'ACTIVE' AND expiry_time > ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(as_of.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count boosts")?;
        Ok(row.get("n"))
    }

    /// Expire elapsed boosts for accounts on a float. Returns the affected
    /// (boost, account) pairs for event publication.
    pub async fn expire_boosts(
        &self,
        client_id: &str,
        float_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<(BoostId, AccountId)>> {
        let rows = sqlx::query(
            r#"
            UPDATE boosts
            SET boost_status = 'EXPIRED'
            WHERE boost_status = 'ACTIVE' AND expiry_time <= ?
              AND account_id IN (
                  SELECT account_id FROM accounts WHERE client_id = ? AND float_id = ?
              )
            RETURNING boost_id, account_id
            "#,
        )
        .bind(as_of.to_rfc3339())
        .bind(client_id)
        .bind(float_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to expire boosts")?;

        rows.iter()
            .map(|row| {
                Ok((
                    Self::parse_uuid(row, "boost_id")?,
                    Self::parse_uuid(row, "account_id")?,
                ))
            })
            .collect()
    }

    // ========================
    // Savings heat inputs
    // ========================

    /// Settled saving events for an account since a moment; the heat score's
    /// raw ingredient.
    pub async fn settled_save_count_since(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM account_transactions
            WHERE account_id = ? AND transaction_type = 'USER_SAVING_EVENT'
              AND settlement_status = 'SETTLED' AND creation_time >= ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count settled saves")?;
        Ok(row.get("n"))
    }

    // ========================
    // Row conversion
    // ========================

    fn parse_uuid(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Uuid> {
        let value: String = row.get(column);
        Uuid::parse_str(&value).with_context(|| format!("Invalid UUID in {column}"))
    }

    fn parse_time(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<DateTime<Utc>> {
        let value: String = row.get(column);
        Ok(DateTime::parse_from_rfc3339(&value)
            .with_context(|| format!("Invalid timestamp in {column}"))?
            .with_timezone(&Utc))
    }

    fn parse_unit_sum(row: &sqlx::sqlite::SqliteRow) -> Result<(Unit, i64)> {
        let unit_str: String = row.get("unit");
        let unit = Unit::from_str(&unit_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid unit: {unit_str}"))?;
        Ok((unit, row.get("total")))
    }

    /// Collapse (currency, unit, sum) rows into per-currency canonical-unit
    /// totals.
    fn currency_totals(rows: &[sqlx::sqlite::SqliteRow]) -> Result<HashMap<String, MoneyAmount>> {
        let mut totals: HashMap<String, MoneyAmount> = HashMap::new();
        for row in rows {
            let currency: String = row.get("currency");
            let (unit, sum) = Self::parse_unit_sum(row)?;
            let entry = totals
                .entry(currency.clone())
                .or_insert_with(|| MoneyAmount::zero(&currency));
            entry.amount += crate::domain::convert_amount(sum, unit, Unit::HundredthCent);
        }
        Ok(totals)
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        Ok(Account {
            account_id: Self::parse_uuid(row, "account_id")?,
            owner_user_id: Self::parse_uuid(row, "owner_user_id")?,
            client_id: row.get("client_id"),
            float_id: row.get("float_id"),
            creation_time: Self::parse_time(row, "creation_time")?,
        })
    }

    fn row_to_account_tx(row: &sqlx::sqlite::SqliteRow) -> Result<AccountTransaction> {
        let type_str: String = row.get("transaction_type");
        let status_str: String = row.get("settlement_status");
        let unit_str: String = row.get("unit");
        let settlement_time: Option<String> = row.get("settlement_time");
        let float_adjust: Option<String> = row.get("float_adjust_tx_id");
        let float_alloc: Option<String> = row.get("float_alloc_tx_id");

        Ok(AccountTransaction {
            transaction_id: Self::parse_uuid(row, "transaction_id")?,
            account_id: Self::parse_uuid(row, "account_id")?,
            transaction_type: TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {type_str}"))?,
            amount: MoneyAmount::new(
                row.get("amount"),
                Unit::from_str(&unit_str)
                    .ok_or_else(|| anyhow::anyhow!("Invalid unit: {unit_str}"))?,
                row.get::<String, _>("currency"),
            ),
            float_id: row.get("float_id"),
            client_id: row.get("client_id"),
            settlement_status: SettlementStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid settlement status: {status_str}"))?,
            initiation_time: Self::parse_time(row, "initiation_time")?,
            settlement_time: settlement_time
                .map(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|t| t.with_timezone(&Utc))
                        .context("Invalid settlement time")
                })
                .transpose()?,
            creation_time: Self::parse_time(row, "creation_time")?,
            float_adjust_tx_id: float_adjust
                .map(|s| Uuid::parse_str(&s).context("Invalid float adjust tx ID"))
                .transpose()?,
            float_alloc_tx_id: float_alloc
                .map(|s| Uuid::parse_str(&s).context("Invalid float alloc tx ID"))
                .transpose()?,
        })
    }

    fn row_to_float_tx(row: &sqlx::sqlite::SqliteRow) -> Result<FloatTransaction> {
        let type_str: String = row.get("t_type");
        let state_str: String = row.get("t_state");
        let unit_str: String = row.get("unit");
        let alloc_type_str: String = row.get("allocated_to_type");
        let related_type: Option<String> = row.get("related_entity_type");

        Ok(FloatTransaction {
            transaction_id: Self::parse_uuid(row, "transaction_id")?,
            client_id: row.get("client_id"),
            float_id: row.get("float_id"),
            transaction_type: TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {type_str}"))?,
            amount: MoneyAmount::new(
                row.get("amount"),
                Unit::from_str(&unit_str)
                    .ok_or_else(|| anyhow::anyhow!("Invalid unit: {unit_str}"))?,
                row.get::<String, _>("currency"),
            ),
            allocated_to_type: AllocatedToType::from_str(&alloc_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid allocation type: {alloc_type_str}"))?,
            allocated_to_id: row.get("allocated_to_id"),
            settlement_state: SettlementStatus::from_str(&state_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid settlement state: {state_str}"))?,
            related_entity_type: related_type.and_then(|s| BackingEntityType::from_str(&s)),
            related_entity_id: row.get("related_entity_id"),
            creation_time: Self::parse_time(row, "creation_time")?,
        })
    }

    fn row_to_float_log(row: &sqlx::sqlite::SqliteRow) -> Result<FloatLog> {
        let type_str: String = row.get("log_type");
        let context_str: String = row.get("log_context");
        Ok(FloatLog {
            log_id: Self::parse_uuid(row, "log_id")?,
            client_id: row.get("client_id"),
            float_id: row.get("float_id"),
            log_type: FloatLogType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid log type: {type_str}"))?,
            log_context: serde_json::from_str(&context_str).context("Invalid log context")?,
            reference_time: Self::parse_time(row, "reference_time")?,
            creation_time: Self::parse_time(row, "creation_time")?,
            resolved: row.get::<i32, _>("resolved") != 0,
        })
    }

    // ========================
    // Insert binding
    // ========================

    fn bind_account_tx_insert(
        tx: &AccountTransaction,
    ) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO account_transactions
                (transaction_id, account_id, transaction_type, currency, unit, amount,
                 float_id, client_id, settlement_status, initiation_time, settlement_time,
                 creation_time, float_adjust_tx_id, float_alloc_tx_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.transaction_id.to_string())
        .bind(tx.account_id.to_string())
        .bind(tx.transaction_type.as_str())
        .bind(tx.amount.currency.clone())
        .bind(tx.amount.unit.as_str())
        .bind(tx.amount.amount)
        .bind(tx.float_id.clone())
        .bind(tx.client_id.clone())
        .bind(tx.settlement_status.as_str())
        .bind(tx.initiation_time.to_rfc3339())
        .bind(tx.settlement_time.map(|t| t.to_rfc3339()))
        .bind(tx.creation_time.to_rfc3339())
        .bind(tx.float_adjust_tx_id.map(|id| id.to_string()))
        .bind(tx.float_alloc_tx_id.map(|id| id.to_string()))
    }

    fn bind_float_tx_insert(
        tx: &FloatTransaction,
    ) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO float_transactions
                (transaction_id, client_id, float_id, t_type, currency, unit, amount,
                 allocated_to_type, allocated_to_id, t_state, related_entity_type,
                 related_entity_id, creation_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.transaction_id.to_string())
        .bind(tx.client_id.clone())
        .bind(tx.float_id.clone())
        .bind(tx.transaction_type.as_str())
        .bind(tx.amount.currency.clone())
        .bind(tx.amount.unit.as_str())
        .bind(tx.amount.amount)
        .bind(tx.allocated_to_type.as_str())
        .bind(tx.allocated_to_id.clone())
        .bind(tx.settlement_state.as_str())
        .bind(tx.related_entity_type.map(|t| t.as_str()))
        .bind(tx.related_entity_id.clone())
        .bind(tx.creation_time.to_rfc3339())
    }

    fn bind_float_log_insert(
        log: &FloatLog,
    ) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
        sqlx::query(
            r#"
            INSERT INTO float_logs
                (log_id, client_id, float_id, log_type, log_context, reference_time,
                 creation_time, resolved)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.log_id.to_string())
        .bind(log.client_id.clone())
        .bind(log.float_id.clone())
        .bind(log.log_type.as_str())
        .bind(log.log_context.to_string())
        .bind(log.reference_time.to_rfc3339())
        .bind(log.creation_time.to_rfc3339())
        .bind(log.resolved as i32)
    }

    fn window_start(start: Option<DateTime<Utc>>) -> String {
        start
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .to_rfc3339()
    }

    fn window_end(end: Option<DateTime<Utc>>) -> String {
        end.unwrap_or_else(Utc::now).to_rfc3339()
    }
}
