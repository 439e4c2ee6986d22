use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount, CategoryId, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TransactionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Money coming into the account; adds to balances.
    Income,
    /// Money leaving the account; subtracts from balances.
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "INCOME" => Some(TransactionType::Income),
            "EXPENSE" => Some(TransactionType::Expense),
            _ => None,
        }
    }

    /// Apply this direction's sign to a non-negative amount.
    pub fn sign(&self, amount: Amount) -> Amount {
        match self {
            TransactionType::Income => amount,
            TransactionType::Expense if amount.is_zero() => amount,
            TransactionType::Expense => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unvalidated input for a new transaction. Any field may be missing; the
/// account rejects the draft when a required one is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub amount: Option<Amount>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
    pub date: Option<NaiveDate>,
    pub comment: Option<String>,
}

impl TransactionDraft {
    pub fn new(amount: Amount, kind: TransactionType, date: NaiveDate) -> Self {
        Self {
            amount: Some(amount),
            kind: Some(kind),
            date: Some(date),
            comment: None,
        }
    }

    pub fn income(amount: Amount, date: NaiveDate) -> Self {
        Self::new(amount, TransactionType::Income, date)
    }

    pub fn expense(amount: Amount, date: NaiveDate) -> Self {
        Self::new(amount, TransactionType::Expense, date)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A single income or expense movement recorded on an account.
///
/// Transactions are immutable once committed. A transaction never moves
/// between categories; it is deleted and recorded again instead.
///
/// Equality and hashing look only at `id`. A value that was never committed
/// has no id and is equal only to itself.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub(crate) id: Option<TransactionId>,
    account_id: AccountId,
    category_id: CategoryId,
    /// Always non-negative; the sign comes from `kind`
    amount: Amount,
    #[serde(rename = "type")]
    kind: TransactionType,
    date: NaiveDate,
    comment: Option<String>,
}

impl Transaction {
    /// Create an uncommitted transaction. The id is assigned by the account
    /// it is recorded on.
    pub fn new(
        account_id: AccountId,
        category_id: CategoryId,
        amount: Amount,
        kind: TransactionType,
        date: NaiveDate,
        comment: Option<String>,
    ) -> Result<Self, ValidationError> {
        if amount < Amount::ZERO {
            return Err(ValidationError::NegativeAmount(amount));
        }
        Ok(Self {
            id: None,
            account_id,
            category_id,
            amount,
            kind,
            date,
            comment,
        })
    }

    /// Validate a draft into an uncommitted transaction.
    pub fn from_draft(
        draft: TransactionDraft,
        account_id: AccountId,
        category_id: CategoryId,
    ) -> Result<Self, ValidationError> {
        let amount = draft.amount.ok_or(ValidationError::MissingAmount)?;
        let kind = draft.kind.ok_or(ValidationError::MissingType)?;
        let date = draft.date.ok_or(ValidationError::MissingDate)?;
        Self::new(account_id, category_id, amount, kind, date, draft.comment)
    }

    /// Rebuild a committed transaction from storage.
    pub(crate) fn restore(
        id: TransactionId,
        account_id: AccountId,
        category_id: CategoryId,
        amount: Amount,
        kind: TransactionType,
        date: NaiveDate,
        comment: Option<String>,
    ) -> Result<Self, ValidationError> {
        let mut transaction = Self::new(account_id, category_id, amount, kind, date, comment)?;
        transaction.id = Some(id);
        Ok(transaction)
    }

    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn kind(&self) -> TransactionType {
        self.kind
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// The amount as it is folded into balances: positive for income,
    /// negative for expense.
    pub fn signed_amount(&self) -> Amount {
        self.kind.sign(self.amount)
    }

    pub fn is_committed(&self) -> bool {
        self.id.is_some()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::eq(self, other),
        }
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
