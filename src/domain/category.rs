use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Amount, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(i64);

impl CategoryId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for CategoryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Running state of one category within an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryEntry {
    pub balance: Amount,
    pub transactions: BTreeSet<TransactionId>,
}

/// Per-category balances of an account, together with the ids of the
/// transactions that produced each balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CategoryBalances {
    entries: BTreeMap<CategoryId, CategoryEntry>,
}

impl CategoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category with a zero balance. Existing entries are kept.
    pub fn open(&mut self, category: CategoryId) {
        self.entries.entry(category).or_default();
    }

    pub fn contains_category(&self, category: CategoryId) -> bool {
        self.entries.contains_key(&category)
    }

    /// True if `id` is recorded under exactly `category`.
    pub fn contains(&self, category: CategoryId, id: TransactionId) -> bool {
        self.entries
            .get(&category)
            .is_some_and(|entry| entry.transactions.contains(&id))
    }

    pub fn balance(&self, category: CategoryId) -> Option<Amount> {
        self.entries.get(&category).map(|entry| entry.balance)
    }

    /// Balance the category would have after applying `signed`, or None on
    /// overflow. Does not mutate.
    pub fn projected(&self, category: CategoryId, signed: Amount) -> Option<Amount> {
        self.balance(category)
            .unwrap_or(Amount::ZERO)
            .checked_add(signed)
    }

    /// Record `id` under `category` and fold its signed amount into the
    /// category balance. The caller has already checked for overflow.
    pub(crate) fn apply(&mut self, category: CategoryId, id: TransactionId, signed: Amount) {
        let entry = self.entries.entry(category).or_default();
        entry.balance += signed;
        entry.transactions.insert(id);
    }

    /// Undo a previous `apply`. Returns false without mutating when `id` is
    /// not recorded under `category` or the balance would leave the
    /// `Amount` range.
    pub(crate) fn revert(&mut self, category: CategoryId, id: TransactionId, signed: Amount) -> bool {
        let Some(entry) = self.entries.get_mut(&category) else {
            return false;
        };
        if !entry.transactions.contains(&id) {
            return false;
        }
        let Some(balance) = entry.balance.checked_sub(signed) else {
            return false;
        };
        entry.transactions.remove(&id);
        entry.balance = balance;
        true
    }

    pub fn transaction_ids(&self, category: CategoryId) -> impl Iterator<Item = TransactionId> + '_ {
        self.entries
            .get(&category)
            .into_iter()
            .flat_map(|entry| entry.transactions.iter().copied())
    }

    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.entries.keys().copied()
    }

    /// Category id to balance, ordered by category.
    pub fn balances(&self) -> BTreeMap<CategoryId, Amount> {
        self.entries
            .iter()
            .map(|(category, entry)| (*category, entry.balance))
            .collect()
    }

    /// Sum of every category balance, or None if it leaves the `Amount`
    /// range.
    pub fn total(&self) -> Option<Amount> {
        self.entries
            .values()
            .try_fold(Amount::ZERO, |total, entry| total.checked_add(entry.balance))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
