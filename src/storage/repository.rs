use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    reconcile, Account, AccountId, Amount, CategoryId, StoredBalances, Transaction, TransactionId,
    TransactionType, User, UserId,
};

use super::MIGRATION_001_INITIAL;

/// What happened to a `save_account` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Someone saved the account since it was loaded; nothing was written
    Conflict,
    /// The account no longer exists
    NotFound,
}

/// Repository for persisting users and whole account aggregates.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    /// Writers wait up to `busy_timeout` for the database lock.
    pub async fn connect(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        let repo = Self::connect(database_url, busy_timeout).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // User operations
    // ========================

    /// Save a new user to the database. Returns false, writing nothing, when
    /// another user already has the same email.
    pub async fn save_user(&self, user: &User) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name, email, base_currency, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.base_currency)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(false),
            Err(err) => Err(err).context("Failed to save user"),
        }
    }

    /// Get a user by ID, together with the ids of the accounts they own.
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, base_currency, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        match row {
            Some(row) => Ok(Some(self.with_accounts(Self::row_to_user(&row)?).await?)),
            None => Ok(None),
        }
    }

    /// Get a user by email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, base_currency, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by email")?;

        match row {
            Some(row) => Ok(Some(self.with_accounts(Self::row_to_user(&row)?).await?)),
            None => Ok(None),
        }
    }

    /// List all users, ordered by name.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, name, email, base_currency, created_at FROM users ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(self.with_accounts(Self::row_to_user(row)?).await?);
        }
        Ok(users)
    }

    /// Delete a user and, explicitly, every account they own along with the
    /// accounts' categories and transactions. All or nothing.
    pub async fn delete_user_cascade(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for account_id in &user.accounts {
            Self::delete_account_rows(&mut tx, *account_id).await?;
        }

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to delete user")?;

        tx.commit().await.context("Failed to commit user deletion")?;
        debug!(user = %user.id, accounts = user.accounts.len(), "deleted user cascade");
        Ok(())
    }

    async fn with_accounts(&self, user: User) -> Result<User> {
        let accounts = self.list_account_ids_for_user(user.id).await?;
        Ok(user.with_accounts(accounts))
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(User {
            id: Uuid::parse_str(&id_str).context("Invalid user ID")?.into(),
            name: row.get("name"),
            email: row.get("email"),
            base_currency: row.get("base_currency"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
            accounts: Vec::new(),
        })
    }

    // ========================
    // Account operations
    // ========================

    /// Insert a new account together with whatever it already contains.
    /// Afterwards the account has nothing pending.
    pub async fn insert_account(&self, account: &mut Account) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, name, balance, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id().to_string())
        .bind(account.user_id().to_string())
        .bind(account.name())
        .bind(account.balance().to_string())
        .bind(account.version())
        .bind(account.created_at().to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert account")?;

        let id_str = account.id().to_string();
        for (category, balance) in account.category_balances() {
            Self::upsert_category_balance(&mut tx, &id_str, category, balance).await?;
        }
        for transaction in account.transactions() {
            Self::insert_transaction(&mut tx, &id_str, transaction).await?;
        }

        tx.commit().await.context("Failed to commit account")?;
        account.mark_saved(account.version());
        Ok(())
    }

    /// Load an account aggregate and check that the stored balances agree
    /// with its transactions.
    pub async fn load_account(&self, id: AccountId) -> Result<Option<Account>> {
        let Some((account, stored)) = self.load_account_unverified(id).await? else {
            return Ok(None);
        };

        let discrepancies = reconcile(&account, &stored);
        if let Some(first) = discrepancies.first() {
            anyhow::bail!(
                "Account {} failed reconciliation ({} problem(s)): {}",
                id,
                discrepancies.len(),
                first
            );
        }

        Ok(Some(account))
    }

    /// Load an account aggregate along with the balances as stored, without
    /// reconciling them. All reads happen in one transaction.
    pub async fn load_account_unverified(
        &self,
        id: AccountId,
    ) -> Result<Option<(Account, StoredBalances)>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, balance, version, created_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch account")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let category_rows = sqlx::query(
            r#"
            SELECT category_id, balance
            FROM category_balances
            WHERE account_id = ?
            ORDER BY category_id
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch category balances")?;

        let transaction_rows = sqlx::query(
            r#"
            SELECT id, account_id, category_id, amount, type, date, comment
            FROM transactions
            WHERE account_id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch transactions")?;

        tx.commit().await.context("Failed to finish account read")?;

        let mut categories = BTreeMap::new();
        for category_row in &category_rows {
            let category = CategoryId::new(category_row.get("category_id"));
            let balance: String = category_row.get("balance");
            categories.insert(category, parse_decimal(&balance)?);
        }

        let transactions = transaction_rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;

        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let balance_str: String = row.get("balance");
        let created_at_str: String = row.get("created_at");

        let account = Account::restore(
            Uuid::parse_str(&id_str).context("Invalid account ID")?.into(),
            Uuid::parse_str(&user_id_str).context("Invalid user ID")?.into(),
            row.get("name"),
            DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
            row.get("version"),
            categories.keys().copied().collect::<Vec<_>>(),
            transactions,
        )
        .with_context(|| format!("Failed to rebuild account {}", id))?;

        let stored = StoredBalances {
            balance: parse_decimal(&balance_str)?,
            categories,
        };

        debug!(account = %id, transactions = account.len(), "loaded account");
        Ok(Some((account, stored)))
    }

    /// Persist the aggregate's pending changes: the header, the touched
    /// category balances and the added or removed transactions, in one
    /// transaction.
    ///
    /// The write only happens if the stored version still matches the
    /// account's version; the account's version is bumped on success.
    pub async fn save_account(&self, account: &mut Account) -> Result<SaveOutcome> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = ?, balance = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(account.name())
        .bind(account.balance().to_string())
        .bind(account.id().to_string())
        .bind(account.version())
        .execute(&mut *tx)
        .await
        .context("Failed to update account")?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
                .bind(account.id().to_string())
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to check account")?
                .is_some();
            tx.rollback().await.context("Failed to roll back")?;
            return Ok(if exists {
                SaveOutcome::Conflict
            } else {
                SaveOutcome::NotFound
            });
        }

        Self::write_changes(&mut tx, account).await?;

        tx.commit().await.context("Failed to commit account")?;
        account.mark_saved(account.version() + 1);
        debug!(account = %account.id(), version = account.version(), "saved account");
        Ok(SaveOutcome::Saved)
    }

    /// Delete an account with its categories and transactions.
    /// Returns false if there was no such account.
    pub async fn delete_account(&self, id: AccountId) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let deleted = Self::delete_account_rows(&mut tx, id).await?;
        tx.commit().await.context("Failed to commit account deletion")?;
        Ok(deleted)
    }

    /// List ids of every account, oldest first.
    pub async fn list_account_ids(&self) -> Result<Vec<AccountId>> {
        let rows = sqlx::query("SELECT id FROM accounts ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account_id).collect()
    }

    /// List ids of the accounts owned by a user, oldest first.
    pub async fn list_account_ids_for_user(&self, user_id: UserId) -> Result<Vec<AccountId>> {
        let rows = sqlx::query("SELECT id FROM accounts WHERE user_id = ? ORDER BY created_at, id")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts for user")?;

        rows.iter().map(Self::row_to_account_id).collect()
    }

    /// Count stored transactions for an account.
    pub async fn count_transactions(&self, id: AccountId) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) as count FROM transactions WHERE account_id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transactions")?
            .get("count");
        Ok(count)
    }

    async fn delete_account_rows(conn: &mut SqliteConnection, id: AccountId) -> Result<bool> {
        let id_str = id.to_string();

        sqlx::query("DELETE FROM transactions WHERE account_id = ?")
            .bind(&id_str)
            .execute(&mut *conn)
            .await
            .context("Failed to delete transactions")?;

        sqlx::query("DELETE FROM category_balances WHERE account_id = ?")
            .bind(&id_str)
            .execute(&mut *conn)
            .await
            .context("Failed to delete category balances")?;

        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(&id_str)
            .execute(&mut *conn)
            .await
            .context("Failed to delete account")?;

        Ok(result.rows_affected() > 0)
    }

    async fn write_changes(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
        let id_str = account.id().to_string();
        let pending = account.pending_changes();

        for transaction_id in pending.deleted() {
            sqlx::query("DELETE FROM transactions WHERE id = ? AND account_id = ?")
                .bind(transaction_id.to_string())
                .bind(&id_str)
                .execute(&mut *conn)
                .await
                .context("Failed to delete transaction")?;
        }

        for transaction_id in pending.inserted() {
            let transaction = account.get_transaction_by_id(transaction_id)?;
            Self::insert_transaction(&mut *conn, &id_str, transaction).await?;
        }

        for category in pending.categories() {
            if let Some(balance) = account.category_balance(category) {
                Self::upsert_category_balance(&mut *conn, &id_str, category, balance).await?;
            }
        }

        debug!(
            account = %account.id(),
            inserted = pending.inserted().count(),
            deleted = pending.deleted().count(),
            "wrote account changes"
        );
        Ok(())
    }

    async fn upsert_category_balance(
        conn: &mut SqliteConnection,
        account_id: &str,
        category: CategoryId,
        balance: Amount,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO category_balances (account_id, category_id, balance)
            VALUES (?, ?, ?)
            ON CONFLICT (account_id, category_id) DO UPDATE SET balance = excluded.balance
            "#,
        )
        .bind(account_id)
        .bind(category.get())
        .bind(balance.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to save category balance")?;
        Ok(())
    }

    async fn insert_transaction(
        conn: &mut SqliteConnection,
        account_id: &str,
        transaction: &Transaction,
    ) -> Result<()> {
        let transaction_id = transaction
            .id()
            .context("Committed transaction without an id")?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, category_id, amount, type, date, comment)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction_id.to_string())
        .bind(account_id)
        .bind(transaction.category_id().get())
        .bind(transaction.amount().to_string())
        .bind(transaction.kind().as_str())
        .bind(transaction.date().to_string())
        .bind(transaction.comment())
        .execute(&mut *conn)
        .await
        .context("Failed to save transaction")?;
        Ok(())
    }

    fn row_to_account_id(row: &SqliteRow) -> Result<AccountId> {
        let id_str: String = row.get("id");
        Ok(Uuid::parse_str(&id_str).context("Invalid account ID")?.into())
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let account_id_str: String = row.get("account_id");
        let amount_str: String = row.get("amount");
        let type_str: String = row.get("type");
        let date_str: String = row.get("date");

        let transaction = Transaction::restore(
            TransactionId::from(Uuid::parse_str(&id_str).context("Invalid transaction ID")?),
            Uuid::parse_str(&account_id_str)
                .context("Invalid account ID")?
                .into(),
            CategoryId::new(row.get("category_id")),
            parse_decimal(&amount_str)?,
            TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
            NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").context("Invalid transaction date")?,
            row.get("comment"),
        )
        .with_context(|| format!("Invalid stored transaction {}", id_str))?;

        Ok(transaction)
    }
}

fn parse_decimal(value: &str) -> Result<Amount> {
    Decimal::from_str_exact(value).with_context(|| format!("Invalid decimal value: {}", value))
}
