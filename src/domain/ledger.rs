use std::collections::BTreeMap;
use std::fmt;

use super::{Account, AccountId, Amount, CategoryId, Transaction};

/// Compute the balance from a list of transactions.
/// Balance = sum of incomes - sum of expenses
///
/// Returns None if the sum leaves the `Amount` range.
pub fn compute_balance<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Option<Amount> {
    transactions
        .into_iter()
        .try_fold(Amount::ZERO, |balance, t| balance.checked_add(t.signed_amount()))
}

/// Compute per-category balances from a list of transactions.
pub fn compute_category_balances<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Option<BTreeMap<CategoryId, Amount>> {
    let mut balances = BTreeMap::new();

    for transaction in transactions {
        let balance = balances
            .entry(transaction.category_id())
            .or_insert(Amount::ZERO);
        *balance = balance.checked_add(transaction.signed_amount())?;
    }

    Some(balances)
}

/// Balances as they were written to storage, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredBalances {
    pub balance: Amount,
    pub categories: BTreeMap<CategoryId, Amount>,
}

/// A sum that reconciliation had to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summation {
    /// Signed amounts of all transactions
    Transactions,
    /// Signed amounts of the transactions in each category
    CategoryTransactions,
    /// Stored category balances
    StoredCategories,
}

impl fmt::Display for Summation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Summation::Transactions => "transaction amounts",
            Summation::CategoryTransactions => "per-category transaction amounts",
            Summation::StoredCategories => "stored category balances",
        };
        f.write_str(name)
    }
}

/// A single mismatch between stored and recomputed balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    AccountBalance {
        stored: Amount,
        computed: Amount,
    },
    CategoryBalance {
        category: CategoryId,
        stored: Amount,
        computed: Amount,
    },
    /// Category balances do not add up to the account balance
    UnbalancedCategories {
        balance: Amount,
        categories_total: Amount,
    },
    /// A sum could not be computed within the `Amount` range
    Overflow(Summation),
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::AccountBalance { stored, computed } => write!(
                f,
                "account balance is {} but transactions sum to {}",
                stored, computed
            ),
            Discrepancy::CategoryBalance {
                category,
                stored,
                computed,
            } => write!(
                f,
                "category {} balance is {} but its transactions sum to {}",
                category, stored, computed
            ),
            Discrepancy::UnbalancedCategories {
                balance,
                categories_total,
            } => write!(
                f,
                "account balance {} differs from category total {}",
                balance, categories_total
            ),
            Discrepancy::Overflow(sum) => write!(f, "sum of {} overflows", sum),
        }
    }
}

/// Compare balances read from storage against the ones an account derives
/// from its transactions.
pub fn reconcile(account: &Account, stored: &StoredBalances) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    match compute_balance(account.transactions()) {
        Some(computed) if computed != stored.balance => {
            discrepancies.push(Discrepancy::AccountBalance {
                stored: stored.balance,
                computed,
            });
        }
        Some(_) => {}
        None => discrepancies.push(Discrepancy::Overflow(Summation::Transactions)),
    }

    match compute_category_balances(account.transactions()) {
        Some(computed_categories) => {
            for category in account.categories().categories() {
                let computed = computed_categories
                    .get(&category)
                    .copied()
                    .unwrap_or(Amount::ZERO);
                let stored_balance = stored.categories.get(&category).copied();
                if stored_balance != Some(computed) {
                    discrepancies.push(Discrepancy::CategoryBalance {
                        category,
                        stored: stored_balance.unwrap_or(Amount::ZERO),
                        computed,
                    });
                }
            }
        }
        None => discrepancies.push(Discrepancy::Overflow(Summation::CategoryTransactions)),
    }

    let categories_total = stored
        .categories
        .values()
        .try_fold(Amount::ZERO, |total, balance| total.checked_add(*balance));
    match categories_total {
        Some(categories_total) if categories_total != stored.balance => {
            discrepancies.push(Discrepancy::UnbalancedCategories {
                balance: stored.balance,
                categories_total,
            });
        }
        Some(_) => {}
        None => discrepancies.push(Discrepancy::Overflow(Summation::StoredCategories)),
    }

    discrepancies
}

/// Result of checking every stored account.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    pub problems: Vec<(AccountId, Discrepancy)>,
}

impl IntegrityReport {
    pub fn record(&mut self, account: &Account, stored: &StoredBalances) {
        self.accounts_checked += 1;
        self.transactions_checked += account.len();
        self.problems.extend(
            reconcile(account, stored)
                .into_iter()
                .map(|discrepancy| (account.id(), discrepancy)),
        );
    }

    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::{TransactionDraft, UserId};

    fn d(s: &str) -> Amount {
        Decimal::from_str_exact(s).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn sample_account() -> Account {
        let mut account = Account::new(UserId::new(), "Checking");
        account
            .add_transaction(TransactionDraft::income(d("5000"), date()), CategoryId::new(1))
            .unwrap();
        account
            .add_transaction(TransactionDraft::expense(d("1500"), date()), CategoryId::new(2))
            .unwrap();
        account
            .add_transaction(TransactionDraft::expense(d("500"), date()), CategoryId::new(2))
            .unwrap();
        account
    }

    fn stored_from(account: &Account) -> StoredBalances {
        StoredBalances {
            balance: account.balance(),
            categories: account.category_balances(),
        }
    }

    #[test]
    fn test_compute_balance_empty() {
        let account = Account::new(UserId::new(), "Empty");
        assert_eq!(compute_balance(account.transactions()), Some(Amount::ZERO));
    }

    #[test]
    fn test_compute_balance_mixed() {
        let account = sample_account();
        assert_eq!(compute_balance(account.transactions()), Some(d("3000")));
    }

    #[test]
    fn test_compute_category_balances() {
        let account = sample_account();
        let balances = compute_category_balances(account.transactions()).unwrap();

        assert_eq!(balances.get(&CategoryId::new(1)), Some(&d("5000")));
        assert_eq!(balances.get(&CategoryId::new(2)), Some(&d("-2000")));
    }

    #[test]
    fn test_reconcile_consistent_account() {
        let account = sample_account();
        assert!(reconcile(&account, &stored_from(&account)).is_empty());
    }

    #[test]
    fn test_reconcile_detects_drift() {
        let account = sample_account();
        let mut stored = stored_from(&account);
        stored.balance = d("3000.01");
        stored.categories.insert(CategoryId::new(2), d("-1999.99"));

        let discrepancies = reconcile(&account, &stored);

        assert!(discrepancies.contains(&Discrepancy::AccountBalance {
            stored: d("3000.01"),
            computed: d("3000"),
        }));
        assert!(discrepancies.contains(&Discrepancy::CategoryBalance {
            category: CategoryId::new(2),
            stored: d("-1999.99"),
            computed: d("-2000"),
        }));
        assert_eq!(discrepancies.len(), 2);
    }

    #[test]
    fn test_reconcile_detects_unbalanced_categories() {
        let account = sample_account();
        let mut stored = stored_from(&account);
        stored.categories.insert(CategoryId::new(1), d("4000"));

        let discrepancies = reconcile(&account, &stored);

        assert!(discrepancies.contains(&Discrepancy::UnbalancedCategories {
            balance: d("3000"),
            categories_total: d("2000"),
        }));
    }

    #[test]
    fn test_integrity_report() {
        let account = sample_account();
        let mut report = IntegrityReport::default();
        report.record(&account, &stored_from(&account));

        assert_eq!(report.accounts_checked, 1);
        assert_eq!(report.transactions_checked, 3);
        assert!(report.is_healthy());
    }

    #[test]
    fn test_reconcile_reports_overflowing_stored_sums() {
        let mut account = Account::new(UserId::new(), "Large");
        account
            .add_transaction(TransactionDraft::expense(d("1"), date()), CategoryId::new(3))
            .unwrap();
        account
            .add_transaction(TransactionDraft::income(Decimal::MAX, date()), CategoryId::new(2))
            .unwrap();

        let consistent = stored_from(&account);
        assert!(reconcile(&account, &consistent).is_empty());

        let mut tampered = consistent;
        tampered.categories.insert(CategoryId::new(3), Decimal::MAX);

        let discrepancies = reconcile(&account, &tampered);
        assert!(discrepancies.contains(&Discrepancy::Overflow(Summation::StoredCategories)));
        assert_eq!(
            discrepancies
                .iter()
                .find(|discrepancy| matches!(discrepancy, Discrepancy::Overflow(_)))
                .map(|discrepancy| discrepancy.to_string()),
            Some("sum of stored category balances overflows".to_string())
        );
    }

    #[test]
    fn test_compute_balance_overflow_is_none() {
        let mut big = Account::new(UserId::new(), "Big");
        let mut other = Account::new(UserId::new(), "Other");
        let first = big
            .add_transaction(TransactionDraft::income(Decimal::MAX, date()), CategoryId::new(1))
            .unwrap();
        let second = other
            .add_transaction(TransactionDraft::income(Decimal::MAX, date()), CategoryId::new(1))
            .unwrap();

        assert_eq!(compute_balance([&first, &second]), None);
        assert_eq!(compute_category_balances([&first, &second]), None);
    }
}
