use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::config::{CategoryPolicy, LedgerConfig};
use crate::domain::{
    Account, AccountId, CategoryId, IntegrityReport, Transaction, TransactionDraft,
    TransactionId, User, UserId, ValidationError,
};
use crate::storage::{Repository, SaveOutcome};

use super::{AccountLocks, AppError};

/// Application service over the ledger aggregate.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Mutations hold the account's lock while the aggregate is loaded,
/// changed and saved. Saves are also guarded by the account version, so a
/// writer in another process is detected and the operation is replayed on
/// a fresh copy.
pub struct LedgerService {
    repo: Repository,
    locks: AccountLocks,
    config: LedgerConfig,
}

/// Filter for listing an account's transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub category: Option<CategoryId>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    fn matches(&self, transaction: &Transaction) -> bool {
        self.category.is_none_or(|c| transaction.category_id() == c)
            && self.from_date.is_none_or(|d| transaction.date() >= d)
            && self.to_date.is_none_or(|d| transaction.date() <= d)
    }
}

/// What an aggregate operation produced, and whether the account must be
/// written back.
struct Outcome<T> {
    value: T,
    persist: bool,
}

impl<T> Outcome<T> {
    fn changed(value: T) -> Self {
        Self {
            value,
            persist: true,
        }
    }

    fn unchanged(value: T) -> Self {
        Self {
            value,
            persist: false,
        }
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self {
            repo,
            locks: AccountLocks::new(),
            config,
        }
    }

    /// Initialize a new database at the configured path.
    pub async fn init(config: LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::init(&config.database_url(true), config.busy_timeout).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(&config.database_url(false), config.busy_timeout).await?;
        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // User operations
    // ========================

    /// Create a new user. Emails are unique.
    pub async fn create_user(
        &self,
        name: String,
        email: String,
        base_currency: String,
    ) -> Result<User, AppError> {
        if self.repo.get_user_by_email(&email).await?.is_some() {
            return Err(AppError::UserAlreadyExists(email));
        }

        let user = User::new(name, email, base_currency);
        if !self.repo.save_user(&user).await? {
            return Err(AppError::UserAlreadyExists(user.email));
        }
        info!(user = %user.id, "created user");
        Ok(user)
    }

    /// Get a user with the ids of the accounts they own.
    pub async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        self.repo
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// List all users.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.repo.list_users().await?)
    }

    /// Delete a user and every account they own.
    #[instrument(skip_all, fields(user = %id))]
    pub async fn delete_user(&self, id: UserId) -> Result<User, AppError> {
        let user = self.get_user(id).await?;
        let guards = self.locks.acquire_all(&user.accounts).await;

        // Re-read so accounts opened in the meantime are cascaded too
        let user = self.get_user(id).await?;
        self.repo.delete_user_cascade(&user).await?;
        drop(guards);
        for account in &user.accounts {
            self.locks.forget(*account);
        }

        info!(accounts = user.accounts.len(), "deleted user");
        Ok(user)
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new, empty account for a user.
    pub async fn open_account(&self, user_id: UserId, name: String) -> Result<Account, AppError> {
        let user = self.get_user(user_id).await?;
        let mut account = Account::new(user.id, name);
        self.repo.insert_account(&mut account).await?;
        info!(account = %account.id(), user = %user.id, "opened account");
        Ok(account)
    }

    /// Load an account. The returned value is a consistent snapshot.
    pub async fn get_account(&self, id: AccountId) -> Result<Account, AppError> {
        self.repo
            .load_account(id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    /// Register a category on an account with a zero balance.
    pub async fn open_category(
        &self,
        account_id: AccountId,
        category: CategoryId,
    ) -> Result<Account, AppError> {
        self.mutate(account_id, |account| {
            if account.has_category(category) {
                return Ok(Outcome::unchanged(()));
            }
            account.open_category(category);
            Ok(Outcome::changed(()))
        })
        .await?;
        self.get_account(account_id).await
    }

    /// Delete an account with all of its transactions.
    pub async fn close_account(&self, id: AccountId) -> Result<(), AppError> {
        let guard = self.locks.acquire(id).await;
        let deleted = self.repo.delete_account(id).await?;
        drop(guard);

        if !deleted {
            return Err(AppError::AccountNotFound(id.to_string()));
        }
        self.locks.forget(id);
        info!(account = %id, "closed account");
        Ok(())
    }

    // ========================
    // Transaction operations
    // ========================

    /// Record a draft transaction on an account under `category`.
    #[instrument(skip_all, fields(account = %account_id, category = %category))]
    pub async fn create_transaction(
        &self,
        account_id: AccountId,
        category: CategoryId,
        draft: TransactionDraft,
    ) -> Result<Transaction, AppError> {
        let policy = self.config.category_policy;

        let transaction = self
            .mutate(account_id, |account| {
                if policy == CategoryPolicy::Registered && !account.has_category(category) {
                    return Err(ValidationError::UnknownCategory(category).into());
                }
                let transaction = account.add_transaction(draft.clone(), category)?;
                Ok(Outcome::changed(transaction))
            })
            .await?;

        info!(
            transaction = ?transaction.id(),
            amount = %transaction.amount(),
            kind = %transaction.kind(),
            "recorded transaction"
        );
        Ok(transaction)
    }

    /// Get one of an account's transactions.
    pub async fn get_transaction(
        &self,
        account_id: AccountId,
        transaction_id: TransactionId,
    ) -> Result<Transaction, AppError> {
        let account = self.get_account(account_id).await?;
        Ok(account.get_transaction_by_id(transaction_id)?.clone())
    }

    /// List an account's transactions, ordered by date.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        let account = self.get_account(account_id).await?;
        let candidates = match filter.category {
            Some(category) => account.transactions_in_category(category),
            None => account.transactions(),
        };

        Ok(candidates
            .into_iter()
            .filter(|t| filter.matches(t))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Delete a transaction recorded under `category`.
    ///
    /// `Ok(false)` means nothing was deleted: the id is unknown on this
    /// account or the transaction belongs to another category.
    #[instrument(skip_all, fields(account = %account_id, transaction = %transaction_id, category = %category))]
    pub async fn delete_transaction(
        &self,
        account_id: AccountId,
        transaction_id: TransactionId,
        category: CategoryId,
    ) -> Result<bool, AppError> {
        let deleted = self
            .mutate(account_id, |account| {
                let deleted = account.delete_transaction_by_id(transaction_id, category);
                Ok(if deleted {
                    Outcome::changed(true)
                } else {
                    Outcome::unchanged(false)
                })
            })
            .await?;

        if deleted {
            info!("deleted transaction");
        } else {
            debug!("no transaction to delete under this category");
        }
        Ok(deleted)
    }

    // ========================
    // Integrity operations
    // ========================

    /// Recompute every account's balances from its stored transactions and
    /// report any mismatch with the stored balances.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let mut report = IntegrityReport::default();

        for id in self.repo.list_account_ids().await? {
            if let Some((account, stored)) = self.repo.load_account_unverified(id).await? {
                report.record(&account, &stored);
            }
        }

        if !report.is_healthy() {
            warn!(problems = report.problems.len(), "integrity check found problems");
        }
        Ok(report)
    }

    /// Run `operation` against a freshly loaded copy of the account while
    /// holding its lock, then save the result if it changed anything.
    ///
    /// A save that loses the version race is retried on a reloaded account
    /// up to `max_conflict_retries` times.
    async fn mutate<T, F>(&self, account_id: AccountId, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut(&mut Account) -> Result<Outcome<T>, AppError>,
    {
        let _guard = self.locks.acquire(account_id).await;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let mut account = self.get_account(account_id).await?;
            let outcome = operation(&mut account)?;
            if !outcome.persist {
                return Ok(outcome.value);
            }

            match self.repo.save_account(&mut account).await? {
                SaveOutcome::Saved => return Ok(outcome.value),
                SaveOutcome::NotFound => {
                    return Err(AppError::AccountNotFound(account_id.to_string()));
                }
                SaveOutcome::Conflict if attempts <= self.config.max_conflict_retries => {
                    warn!(account = %account_id, attempts, "version conflict, retrying");
                }
                SaveOutcome::Conflict => {
                    return Err(AppError::ConcurrentModification {
                        account_id,
                        attempts,
                    });
                }
            }
        }
    }
}
