use thiserror::Error;

use crate::domain::SettlementStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("No float configuration for client {client_id}, float {float_id}")]
    ConfigurationMissing { client_id: String, float_id: String },

    #[error("Settlement status cannot move from {from} to {to}")]
    InvalidTransition {
        from: SettlementStatus,
        to: SettlementStatus,
    },

    #[error("Currency mismatch: entry is in {expected}, request used {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
