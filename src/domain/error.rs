use thiserror::Error;

use super::{AccountId, Amount, CategoryId, TransactionId};

/// A draft transaction that cannot be committed. Nothing is mutated when one
/// of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount is required")]
    MissingAmount,

    #[error("amount must not be negative, got {0}")]
    NegativeAmount(Amount),

    #[error("transaction type is required")]
    MissingType,

    #[error("transaction date is required")]
    MissingDate,

    #[error("amount {0} would overflow the account balance")]
    AmountOverflow(Amount),

    #[error("category {0} is not registered on this account")]
    UnknownCategory(CategoryId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    Validation(#[from] ValidationError),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("transaction {0} appears more than once")]
    DuplicateTransaction(TransactionId),

    #[error("transaction {transaction} belongs to account {account}")]
    ForeignTransaction {
        transaction: TransactionId,
        account: AccountId,
    },
}
