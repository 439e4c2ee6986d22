use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::AccountId;

/// Exclusive locks keyed by account.
///
/// A guard is held for the whole load -> mutate -> save cycle so that two
/// mutations of the same account never interleave. Different accounts do
/// not block each other.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `account`.
    pub async fn acquire(&self, account: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(account).or_default())
        };
        lock.lock_owned().await
    }

    /// Acquire several accounts at once. Locks are taken in id order so two
    /// callers asking for overlapping sets cannot deadlock.
    pub async fn acquire_all(&self, accounts: &[AccountId]) -> Vec<OwnedMutexGuard<()>> {
        let mut ordered = accounts.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account in ordered {
            guards.push(self.acquire(account).await);
        }
        guards
    }

    /// Drop the lock entry of a deleted account. The entry stays while any
    /// guard or waiter still shares it, so a later `acquire` for the same id
    /// always meets the same mutex as those waiters.
    pub fn forget(&self, account: AccountId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&account)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&account);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
