use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    Amount, CategoryBalances, CategoryId, LedgerError, Transaction, TransactionDraft,
    TransactionId, TransactionType, UserId, ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Changes made to an account since it was loaded or last saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    inserted: BTreeSet<TransactionId>,
    deleted: BTreeSet<TransactionId>,
    categories: BTreeSet<CategoryId>,
}

impl PendingChanges {
    /// Transactions added since the last save.
    pub fn inserted(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.inserted.iter().copied()
    }

    /// Previously saved transactions removed since the last save.
    pub fn deleted(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.deleted.iter().copied()
    }

    /// Categories whose balance or registration changed.
    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.categories.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.categories.is_empty()
    }

    fn record_insert(&mut self, id: TransactionId, category: CategoryId) {
        self.inserted.insert(id);
        self.categories.insert(category);
    }

    fn record_delete(&mut self, id: TransactionId, category: CategoryId) {
        // Added and removed between two saves: never reached storage
        if !self.inserted.remove(&id) {
            self.deleted.insert(id);
        }
        self.categories.insert(category);
    }
}

/// An account and the income/expense transactions recorded on it.
///
/// The account is the only place its balances change. After every call that
/// returns, `balance` equals the sum of the category balances, and every
/// category balance equals the signed sum of the transactions recorded
/// under that category.
///
/// Gross income and gross expense are each kept within the `Amount` range,
/// so the signed sum of any subset of transactions is representable and
/// deleting never overflows.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    id: AccountId,
    user_id: UserId,
    name: String,
    created_at: DateTime<Utc>,
    /// Bumped by the repository on every successful save
    version: i64,
    balance: Amount,
    categories: CategoryBalances,
    transactions: HashMap<TransactionId, Transaction>,
    #[serde(skip)]
    gross_income: Amount,
    #[serde(skip)]
    gross_expense: Amount,
    #[serde(skip)]
    pending: PendingChanges,
}

impl Account {
    /// A new, empty account: zero balance and no categories.
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            user_id,
            name: name.into(),
            created_at: Utc::now(),
            version: 0,
            balance: Amount::ZERO,
            categories: CategoryBalances::new(),
            transactions: HashMap::new(),
            gross_income: Amount::ZERO,
            gross_expense: Amount::ZERO,
            pending: PendingChanges::default(),
        }
    }

    /// Rebuild an account from stored parts. Balances are recomputed from
    /// the transactions; `categories` lists categories registered without
    /// any transaction yet.
    ///
    /// Fails on a transaction id seen twice or a transaction that belongs to
    /// another account.
    pub fn restore(
        id: AccountId,
        user_id: UserId,
        name: String,
        created_at: DateTime<Utc>,
        version: i64,
        categories: impl IntoIterator<Item = CategoryId>,
        transactions: impl IntoIterator<Item = Transaction>,
    ) -> Result<Self, LedgerError> {
        let mut account = Self {
            id,
            user_id,
            name,
            created_at,
            version,
            balance: Amount::ZERO,
            categories: CategoryBalances::new(),
            transactions: HashMap::new(),
            gross_income: Amount::ZERO,
            gross_expense: Amount::ZERO,
            pending: PendingChanges::default(),
        };

        for category in categories {
            account.categories.open(category);
        }
        for transaction in transactions {
            let transaction_id = transaction.id().unwrap_or_default();
            if transaction.account_id() != id {
                return Err(LedgerError::ForeignTransaction {
                    transaction: transaction_id,
                    account: transaction.account_id(),
                });
            }
            if account.transactions.contains_key(&transaction_id) {
                return Err(LedgerError::DuplicateTransaction(transaction_id));
            }
            account.commit(transaction_id, transaction)?;
        }
        account.pending = PendingChanges::default();

        Ok(account)
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// What changed since the account was loaded or last saved.
    pub fn pending_changes(&self) -> &PendingChanges {
        &self.pending
    }

    /// Record a successful save: the version moves on and nothing is
    /// pending any more.
    pub(crate) fn mark_saved(&mut self, version: i64) {
        self.version = version;
        self.pending = PendingChanges::default();
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn category_balance(&self, category: CategoryId) -> Option<Amount> {
        self.categories.balance(category)
    }

    pub fn category_balances(&self) -> BTreeMap<CategoryId, Amount> {
        self.categories.balances()
    }

    pub fn categories(&self) -> &CategoryBalances {
        &self.categories
    }

    pub fn has_category(&self, category: CategoryId) -> bool {
        self.categories.contains_category(category)
    }

    /// Register a category with a zero balance.
    pub fn open_category(&mut self, category: CategoryId) {
        if !self.categories.contains_category(category) {
            self.categories.open(category);
            self.pending.categories.insert(category);
        }
    }

    /// Validate `draft`, record it under `category` and fold its signed
    /// amount into the category balance and the account balance.
    ///
    /// A category the account has not seen yet starts from zero. On error
    /// nothing is mutated.
    pub fn add_transaction(
        &mut self,
        draft: TransactionDraft,
        category: CategoryId,
    ) -> Result<Transaction, LedgerError> {
        let transaction = Transaction::from_draft(draft, self.id, category)?;
        let id = TransactionId::new();
        self.commit(id, transaction)?;
        self.get_transaction_by_id(id).cloned()
    }

    /// The live transaction with `id` on this account.
    pub fn get_transaction_by_id(&self, id: TransactionId) -> Result<&Transaction, LedgerError> {
        self.transactions
            .get(&id)
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// Remove the transaction `id` if it is recorded under `category`.
    ///
    /// Returns false, leaving the account untouched, when there is no such
    /// transaction or it belongs to another category.
    pub fn delete_transaction_by_id(&mut self, id: TransactionId, category: CategoryId) -> bool {
        let (kind, amount, signed) = match self.transactions.get(&id) {
            Some(transaction) if transaction.category_id() == category => (
                transaction.kind(),
                transaction.amount(),
                transaction.signed_amount(),
            ),
            _ => return false,
        };

        let Some(balance) = self.balance.checked_sub(signed) else {
            return false;
        };
        let gross = match kind {
            TransactionType::Income => self.gross_income.checked_sub(amount),
            TransactionType::Expense => self.gross_expense.checked_sub(amount),
        };
        let Some(gross) = gross else {
            return false;
        };
        if !self.categories.revert(category, id, signed) {
            return false;
        }

        self.transactions.remove(&id);
        self.balance = balance;
        match kind {
            TransactionType::Income => self.gross_income = gross,
            TransactionType::Expense => self.gross_expense = gross,
        }
        self.pending.record_delete(id, category);
        true
    }

    /// Live transactions ordered by date, then id.
    pub fn transactions(&self) -> Vec<&Transaction> {
        let mut transactions: Vec<&Transaction> = self.transactions.values().collect();
        transactions.sort_by_key(|t| (t.date(), t.id()));
        transactions
    }

    /// Live transactions recorded under `category`, ordered by date, then id.
    pub fn transactions_in_category(&self, category: CategoryId) -> Vec<&Transaction> {
        let mut transactions: Vec<&Transaction> = self
            .categories
            .transaction_ids(category)
            .filter_map(|id| self.transactions.get(&id))
            .collect();
        transactions.sort_by_key(|t| (t.date(), t.id()));
        transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Insert an already validated transaction under `id`. Overflow is
    /// checked on the balances and on the gross totals before anything is
    /// touched.
    fn commit(&mut self, id: TransactionId, mut transaction: Transaction) -> Result<(), LedgerError> {
        let category = transaction.category_id();
        let kind = transaction.kind();
        let amount = transaction.amount();
        let signed = transaction.signed_amount();

        let overflow = || ValidationError::AmountOverflow(amount);
        let gross = match kind {
            TransactionType::Income => self.gross_income.checked_add(amount),
            TransactionType::Expense => self.gross_expense.checked_add(amount),
        }
        .ok_or_else(overflow)?;
        self.categories
            .projected(category, signed)
            .ok_or_else(overflow)?;
        let balance = self.balance.checked_add(signed).ok_or_else(overflow)?;

        transaction.id = Some(id);
        self.categories.apply(category, id, signed);
        self.transactions.insert(id, transaction);
        self.balance = balance;
        match kind {
            TransactionType::Income => self.gross_income = gross,
            TransactionType::Expense => self.gross_expense = gross,
        }
        self.pending.record_insert(id, category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::TransactionType;

    fn d(s: &str) -> Amount {
        Decimal::from_str_exact(s).unwrap()
    }

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn empty_account() -> Account {
        Account::new(UserId::new(), "Checking")
    }

    fn assert_consistent(account: &Account) {
        assert_eq!(Some(account.balance()), account.categories().total());
        for category in account.categories().categories() {
            let expected: Amount = account
                .transactions_in_category(category)
                .iter()
                .map(|t| t.signed_amount())
                .sum();
            assert_eq!(account.category_balance(category), Some(expected));
        }
    }

    #[test]
    fn test_new_account_is_empty() {
        let account = empty_account();
        assert_eq!(account.balance(), Amount::ZERO);
        assert!(account.category_balances().is_empty());
        assert!(account.is_empty());
    }

    #[test]
    fn test_income_and_expense_scenario() {
        let mut account = empty_account();
        let three = CategoryId::new(3);

        let income = account
            .add_transaction(TransactionDraft::income(d("1032.52"), date(2022, 1, 6)), three)
            .unwrap();
        assert_eq!(account.balance(), d("1032.52"));
        assert_eq!(account.category_balance(three), Some(d("1032.52")));

        let expense = account
            .add_transaction(TransactionDraft::expense(d("500.00"), date(2022, 1, 7)), three)
            .unwrap();
        assert_eq!(account.balance(), d("532.52"));
        assert_eq!(account.category_balance(three), Some(d("532.52")));
        assert_consistent(&account);

        assert!(account.delete_transaction_by_id(expense.id().unwrap(), three));
        assert_eq!(account.balance(), d("1032.52"));
        assert_eq!(account.category_balance(three), Some(d("1032.52")));

        let before = account.clone();
        assert!(!account.delete_transaction_by_id(income.id().unwrap(), CategoryId::new(7)));
        assert_eq!(account.balance().to_string(), before.balance().to_string());
        assert_eq!(account.category_balances(), before.category_balances());
        assert_eq!(account.len(), 1);
        assert!(!account.has_category(CategoryId::new(7)));
        assert_consistent(&account);
    }

    #[test]
    fn test_add_assigns_id_and_account() {
        let mut account = empty_account();
        let committed = account
            .add_transaction(
                TransactionDraft::expense(d("12.00"), date(2023, 3, 1)).with_comment("lunch"),
                CategoryId::new(1),
            )
            .unwrap();

        let id = committed.id().expect("committed transaction has an id");
        assert_eq!(committed.account_id(), account.id());
        assert_eq!(committed.comment(), Some("lunch"));
        assert_eq!(account.get_transaction_by_id(id).unwrap(), &committed);
    }

    #[test]
    fn test_add_then_delete_restores_state_exactly() {
        let mut account = empty_account();
        account
            .add_transaction(TransactionDraft::income(d("0.10"), date(2023, 1, 1)), CategoryId::new(1))
            .unwrap();
        account
            .add_transaction(TransactionDraft::expense(d("0.20"), date(2023, 1, 2)), CategoryId::new(2))
            .unwrap();
        let balance = account.balance();
        let categories = account.category_balances();

        for (amount, kind) in [("0.30", TransactionType::Income), ("1999.999", TransactionType::Expense)] {
            let committed = account
                .add_transaction(TransactionDraft::new(d(amount), kind, date(2023, 1, 3)), CategoryId::new(2))
                .unwrap();
            assert_consistent(&account);
            assert!(account.delete_transaction_by_id(committed.id().unwrap(), CategoryId::new(2)));
            assert_eq!(account.balance(), balance);
            assert_eq!(account.category_balances(), categories);
        }
        assert_eq!(account.balance(), d("-0.10"));
    }

    #[test]
    fn test_invalid_drafts_do_not_mutate() {
        let mut account = empty_account();
        account
            .add_transaction(TransactionDraft::income(d("100"), date(2023, 1, 1)), CategoryId::new(1))
            .unwrap();
        let valid = TransactionDraft::income(d("5"), date(2023, 1, 2));

        let cases = [
            (TransactionDraft { amount: None, ..valid.clone() }, ValidationError::MissingAmount),
            (
                TransactionDraft { amount: Some(d("-0.01")), ..valid.clone() },
                ValidationError::NegativeAmount(d("-0.01")),
            ),
            (TransactionDraft { kind: None, ..valid.clone() }, ValidationError::MissingType),
            (TransactionDraft { date: None, ..valid.clone() }, ValidationError::MissingDate),
        ];

        for (draft, expected) in cases {
            let err = account.add_transaction(draft, CategoryId::new(2)).unwrap_err();
            assert_eq!(err, LedgerError::Validation(expected));
            assert_eq!(account.balance(), d("100"));
            assert_eq!(account.len(), 1);
            assert!(!account.has_category(CategoryId::new(2)));
        }
    }

    #[test]
    fn test_overflow_is_rejected_without_mutation() {
        let mut account = empty_account();
        account
            .add_transaction(TransactionDraft::income(Decimal::MAX, date(2023, 1, 1)), CategoryId::new(1))
            .unwrap();

        let err = account
            .add_transaction(TransactionDraft::income(d("1"), date(2023, 1, 2)), CategoryId::new(2))
            .unwrap_err();

        assert_eq!(err, LedgerError::Validation(ValidationError::AmountOverflow(d("1"))));
        assert_eq!(account.len(), 1);
        assert_eq!(account.balance(), Decimal::MAX);
    }

    #[test]
    fn test_get_unknown_transaction() {
        let account = empty_account();
        let id = TransactionId::new();
        assert_eq!(
            account.get_transaction_by_id(id).unwrap_err(),
            LedgerError::TransactionNotFound(id)
        );
    }

    #[test]
    fn test_delete_unknown_transaction_returns_false() {
        let mut account = empty_account();
        account.open_category(CategoryId::new(1));
        assert!(!account.delete_transaction_by_id(TransactionId::new(), CategoryId::new(1)));
        assert_eq!(account.category_balance(CategoryId::new(1)), Some(Amount::ZERO));
    }

    #[test]
    fn test_transactions_in_category_are_ordered() {
        let mut account = empty_account();
        let food = CategoryId::new(4);
        for day in [9, 2, 5] {
            account
                .add_transaction(TransactionDraft::expense(d("1"), date(2023, 2, day)), food)
                .unwrap();
        }
        account
            .add_transaction(TransactionDraft::income(d("1"), date(2023, 2, 1)), CategoryId::new(5))
            .unwrap();

        let days: Vec<_> = account
            .transactions_in_category(food)
            .iter()
            .map(|t| t.date())
            .collect();
        assert_eq!(days, vec![date(2023, 2, 2), date(2023, 2, 5), date(2023, 2, 9)]);
        assert_eq!(account.transactions().len(), 4);
    }

    #[test]
    fn test_restore_recomputes_balances() {
        let mut original = empty_account();
        original.open_category(CategoryId::new(9));
        for (amount, kind, category) in [
            ("250.00", TransactionType::Income, 1),
            ("19.99", TransactionType::Expense, 1),
            ("80.01", TransactionType::Expense, 2),
        ] {
            original
                .add_transaction(TransactionDraft::new(d(amount), kind, date(2023, 5, 1)), CategoryId::new(category))
                .unwrap();
        }

        let restored = Account::restore(
            original.id(),
            original.user_id(),
            original.name().to_string(),
            original.created_at(),
            original.version(),
            original.categories().categories().collect::<Vec<_>>(),
            original.transactions().into_iter().cloned().collect::<Vec<_>>(),
        )
        .unwrap();

        assert_eq!(restored.balance(), d("150.00"));
        assert_eq!(restored.category_balances(), original.category_balances());
        assert!(restored.has_category(CategoryId::new(9)));
        assert_consistent(&restored);
    }

    fn restore_with(account: &Account, transactions: Vec<Transaction>) -> Result<Account, LedgerError> {
        Account::restore(
            account.id(),
            account.user_id(),
            account.name().to_string(),
            account.created_at(),
            account.version(),
            Vec::new(),
            transactions,
        )
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let mut account = empty_account();
        let income = account
            .add_transaction(TransactionDraft::income(d("10"), date(2023, 5, 1)), CategoryId::new(1))
            .unwrap();

        let err = restore_with(&account, vec![income.clone(), income.clone()]).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateTransaction(income.id().unwrap()));
    }

    #[test]
    fn test_restore_rejects_other_accounts_transactions() {
        let mut other = empty_account();
        let foreign = other
            .add_transaction(TransactionDraft::income(d("10"), date(2023, 5, 1)), CategoryId::new(1))
            .unwrap();

        let err = restore_with(&empty_account(), vec![foreign.clone()]).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ForeignTransaction {
                transaction: foreign.id().unwrap(),
                account: other.id(),
            }
        );
    }

    #[test]
    fn test_gross_totals_keep_deletes_in_range() {
        let mut account = empty_account();
        let expense = account
            .add_transaction(TransactionDraft::expense(d("1"), date(2023, 1, 1)), CategoryId::new(1))
            .unwrap();
        account
            .add_transaction(TransactionDraft::income(Decimal::MAX, date(2023, 1, 2)), CategoryId::new(2))
            .unwrap();

        // The balance has room, but gross income would not
        let err = account
            .add_transaction(TransactionDraft::income(d("1"), date(2023, 1, 3)), CategoryId::new(3))
            .unwrap_err();
        assert_eq!(err, LedgerError::Validation(ValidationError::AmountOverflow(d("1"))));
        assert!(!account.has_category(CategoryId::new(3)));

        assert!(account.delete_transaction_by_id(expense.id().unwrap(), CategoryId::new(1)));
        assert_eq!(account.balance(), Decimal::MAX);
        assert_consistent(&account);
    }

    #[test]
    fn test_pending_changes_track_unsaved_work() {
        let mut account = empty_account();
        let kept = account
            .add_transaction(TransactionDraft::income(d("3"), date(2023, 1, 1)), CategoryId::new(1))
            .unwrap();
        account.mark_saved(1);
        assert!(account.pending_changes().is_empty());

        let short_lived = account
            .add_transaction(TransactionDraft::expense(d("1"), date(2023, 1, 2)), CategoryId::new(2))
            .unwrap();
        assert!(account.delete_transaction_by_id(short_lived.id().unwrap(), CategoryId::new(2)));
        assert!(account.delete_transaction_by_id(kept.id().unwrap(), CategoryId::new(1)));
        account.open_category(CategoryId::new(5));

        let pending = account.pending_changes();
        assert_eq!(pending.inserted().count(), 0);
        assert_eq!(pending.deleted().collect::<Vec<_>>(), vec![kept.id().unwrap()]);
        assert_eq!(
            pending.categories().collect::<Vec<_>>(),
            vec![CategoryId::new(1), CategoryId::new(2), CategoryId::new(5)]
        );
    }
}
