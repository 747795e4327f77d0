use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clients::{ConfigSource, EventPublisher};
use crate::domain::{
    Account, AccountId, AccountTransaction, AllocatedToType, BackingEntityType, FloatTransaction,
    MoneyAmount, SettlementStatus, TransactionId, TransactionType,
};
use crate::storage::Repository;

use super::AppError;

/// Ledger-facing service: records saving and withdrawal events as atomic
/// three-row entries, walks settlement statuses forward, and writes float
/// allocations. This is the primary write surface for any client (CLI, API,
/// the downstream distributor).
pub struct SavingsService {
    repo: Arc<Repository>,
    config_source: Arc<dyn ConfigSource>,
    publisher: Arc<dyn EventPublisher>,
}

/// Result of recording a saving event: the three cross-referenced entry ids
/// and the account's new aggregated balance.
#[derive(Debug, Clone)]
pub struct SavingEventResult {
    pub account_tx_id: TransactionId,
    pub float_addition_tx_id: TransactionId,
    pub float_allocation_tx_id: TransactionId,
    pub new_balance: MoneyAmount,
}

/// Result of settling a pending entry.
#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub updated_time: DateTime<Utc>,
    pub new_balance: MoneyAmount,
}

/// A float allocation to be written through [`SavingsService::allocate_float`].
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub amount: MoneyAmount,
    pub allocated_to_type: AllocatedToType,
    pub allocated_to_id: String,
    pub transaction_type: TransactionType,
    pub related_entity_type: Option<BackingEntityType>,
    pub related_entity_id: Option<String>,
}

impl SavingsService {
    pub fn new(
        repo: Arc<Repository>,
        config_source: Arc<dyn ConfigSource>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repo,
            config_source,
            publisher,
        }
    }

    /// Create an end-user account tied to a client float. Account records
    /// are owned by the surrounding user-management layer; this exists for
    /// local runs and tests.
    pub async fn create_account(
        &self,
        owner_user_id: Uuid,
        client_id: &str,
        float_id: &str,
    ) -> Result<Account, AppError> {
        let account = Account {
            account_id: Uuid::new_v4(),
            owner_user_id,
            client_id: client_id.to_string(),
            float_id: float_id.to_string(),
            creation_time: Utc::now(),
        };
        self.repo.create_account(&account).await?;
        Ok(account)
    }

    pub async fn get_account(&self, account_id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }

    /// Record a saving (or, for a negative amount, withdrawal) event.
    ///
    /// Exactly three ledger rows are written, all-or-nothing: the account
    /// entry, the float addition and the end-user allocation, sharing the
    /// same amount and cross-referenced through the account entry's id. The
    /// event settles immediately when a settlement time is given, otherwise
    /// it is recorded as pending and the float-side rows stay out of every
    /// balance until settlement.
    pub async fn record_saving_event(
        &self,
        account_id: AccountId,
        amount: MoneyAmount,
        initiation_time: Option<DateTime<Utc>>,
        settlement_time: Option<DateTime<Utc>>,
    ) -> Result<SavingEventResult, AppError> {
        if amount.amount == 0 {
            return Err(AppError::InvalidRequest(
                "Saving amount must be non-zero".to_string(),
            ));
        }

        let account = self.get_account(account_id).await?;
        let config = self
            .config_source
            .float_config(&account.client_id, &account.float_id)
            .await?
            .ok_or_else(|| AppError::ConfigurationMissing {
                client_id: account.client_id.clone(),
                float_id: account.float_id.clone(),
            })?;
        if config.currency != amount.currency {
            return Err(AppError::CurrencyMismatch {
                expected: config.currency,
                actual: amount.currency,
            });
        }

        let now = Utc::now();
        let account_tx_id = Uuid::new_v4();
        let float_addition_tx_id = Uuid::new_v4();
        let float_allocation_tx_id = Uuid::new_v4();

        let transaction_type = if amount.amount < 0 {
            TransactionType::Withdrawal
        } else {
            TransactionType::UserSavingEvent
        };
        let settlement_status = if settlement_time.is_some() {
            SettlementStatus::Settled
        } else {
            SettlementStatus::Pending
        };

        let account_tx = AccountTransaction {
            transaction_id: account_tx_id,
            account_id,
            transaction_type,
            amount: amount.clone(),
            float_id: account.float_id.clone(),
            client_id: account.client_id.clone(),
            settlement_status,
            initiation_time: initiation_time.unwrap_or(now),
            settlement_time,
            creation_time: now,
            float_adjust_tx_id: Some(float_addition_tx_id),
            float_alloc_tx_id: Some(float_allocation_tx_id),
        };

        let float_common = |transaction_id, allocated_to_type, allocated_to_id, t_type| {
            FloatTransaction {
                transaction_id,
                client_id: account.client_id.clone(),
                float_id: account.float_id.clone(),
                transaction_type: t_type,
                amount: amount.clone(),
                allocated_to_type,
                allocated_to_id,
                settlement_state: settlement_status,
                related_entity_type: Some(BackingEntityType::AccountTransaction),
                related_entity_id: Some(account_tx_id.to_string()),
                creation_time: now,
            }
        };
        let float_addition = float_common(
            float_addition_tx_id,
            AllocatedToType::FloatItself,
            account.float_id.clone(),
            transaction_type,
        );
        let float_allocation = float_common(
            float_allocation_tx_id,
            AllocatedToType::EndUserAccount,
            account_id.to_string(),
            TransactionType::Allocation,
        );

        self.repo
            .insert_saving_event(&account_tx, &float_addition, &float_allocation)
            .await?;

        let new_balance = self
            .repo
            .sum_account_balance(account_id, &amount.currency, Utc::now())
            .await?
            .amount;

        let event_type = match (transaction_type, settlement_status) {
            (TransactionType::Withdrawal, _) => "WITHDRAWAL_EVENT_CONFIRMED",
            (_, SettlementStatus::Settled) => "SAVING_PAYMENT_SUCCESSFUL",
            _ => "SAVING_EVENT_INITIATED",
        };
        self.publisher
            .publish(
                account.owner_user_id,
                event_type,
                serde_json::json!({
                    "account_id": account_id,
                    "transaction_id": account_tx_id,
                    "amount": &amount,
                }),
            )
            .await;

        tracing::info!(
            %account_id,
            transaction_id = %account_tx_id,
            amount = amount.amount,
            currency = %amount.currency,
            status = %settlement_status,
            "recorded saving event"
        );

        Ok(SavingEventResult {
            account_tx_id,
            float_addition_tx_id,
            float_allocation_tx_id,
            new_balance,
        })
    }

    /// Move a ledger entry's settlement status forward. Transitions are
    /// one-directional; anything targeting a settled entry, or moving
    /// against the order, fails without side effects. Settling stamps the
    /// settlement time and carries the state onto the event's float rows.
    pub async fn update_settlement_status(
        &self,
        transaction_id: TransactionId,
        new_status: SettlementStatus,
        log_context: serde_json::Value,
    ) -> Result<DateTime<Utc>, AppError> {
        let entry = self
            .repo
            .get_account_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;

        if !entry.settlement_status.can_transition_to(new_status) {
            return Err(AppError::InvalidTransition {
                from: entry.settlement_status,
                to: new_status,
            });
        }

        let settlement_time =
            (new_status == SettlementStatus::Settled).then(Utc::now);
        let updated_time = self
            .repo
            .apply_settlement_update(
                transaction_id,
                entry.settlement_status,
                new_status,
                settlement_time,
                log_context,
            )
            .await?;

        if new_status == SettlementStatus::Settled {
            let account = self.get_account(entry.account_id).await?;
            self.publisher
                .publish(
                    account.owner_user_id,
                    "SAVING_PAYMENT_SUCCESSFUL",
                    serde_json::json!({
                        "account_id": entry.account_id,
                        "transaction_id": transaction_id,
                        "amount": &entry.amount,
                    }),
                )
                .await;
        }

        tracing::info!(
            %transaction_id,
            from = %entry.settlement_status,
            to = %new_status,
            "updated settlement status"
        );
        Ok(updated_time)
    }

    /// Settle a pending entry and return the account's new balance.
    pub async fn settle_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<SettlementResult, AppError> {
        let entry = self
            .repo
            .get_account_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;

        let updated_time = self
            .update_settlement_status(
                transaction_id,
                SettlementStatus::Settled,
                serde_json::json!({ "reason": "payment confirmed" }),
            )
            .await?;

        let new_balance = self
            .repo
            .sum_account_balance(entry.account_id, &entry.amount.currency, Utc::now())
            .await?
            .amount;

        Ok(SettlementResult {
            updated_time,
            new_balance,
        })
    }

    /// Write a batch of float allocations (bonus pool, client share,
    /// end-user accounts) as settled float-side rows, all-or-nothing. Used
    /// by the downstream distributor and admin instructions.
    pub async fn allocate_float(
        &self,
        client_id: &str,
        float_id: &str,
        requests: Vec<AllocationRequest>,
    ) -> Result<Vec<TransactionId>, AppError> {
        if requests.is_empty() {
            return Err(AppError::InvalidRequest(
                "No allocations provided".to_string(),
            ));
        }
        let now = Utc::now();
        let rows: Vec<FloatTransaction> = requests
            .into_iter()
            .map(|request| FloatTransaction {
                transaction_id: Uuid::new_v4(),
                client_id: client_id.to_string(),
                float_id: float_id.to_string(),
                transaction_type: request.transaction_type,
                amount: request.amount,
                allocated_to_type: request.allocated_to_type,
                allocated_to_id: request.allocated_to_id,
                settlement_state: SettlementStatus::Settled,
                related_entity_type: request.related_entity_type,
                related_entity_id: request.related_entity_id,
                creation_time: now,
            })
            .collect();

        Ok(self.repo.allocate_float(&rows).await?)
    }
}
