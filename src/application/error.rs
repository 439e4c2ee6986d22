use thiserror::Error;

use crate::domain::{AccountId, LedgerError, ValidationError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Invalid transaction: {0}")]
    Validation(#[from] ValidationError),

    #[error("Account {account_id} kept changing underneath us; gave up after {attempts} attempts")]
    ConcurrentModification {
        account_id: AccountId,
        attempts: u32,
    },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(err) => AppError::Validation(err),
            LedgerError::TransactionNotFound(id) => AppError::TransactionNotFound(id.to_string()),
            err @ (LedgerError::DuplicateTransaction(_) | LedgerError::ForeignTransaction { .. }) => {
                AppError::Database(anyhow::Error::new(err))
            }
        }
    }
}
