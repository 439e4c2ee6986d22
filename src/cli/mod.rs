use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{LedgerService, TransactionFilter};
use crate::config::{CategoryPolicy, LedgerConfig, DEFAULT_MAX_CONFLICT_RETRIES};
use crate::domain::{
    format_amount, parse_amount, Account, AccountId, CategoryId, Transaction, TransactionDraft,
    TransactionId, TransactionType, UserId,
};

/// Cashflow - Personal Finance Ledger
#[derive(Parser)]
#[command(name = "cashflow")]
#[command(about = "Track account and category balances from income and expense transactions")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "CASHFLOW_DB", default_value = "cashflow.db")]
    pub database: String,

    /// How transactions under unregistered categories are handled
    #[arg(long, env = "CASHFLOW_CATEGORY_POLICY", value_enum, default_value_t = CategoryPolicy::AutoCreate)]
    pub category_policy: CategoryPolicy,

    /// Retries after a concurrent save of the same account
    #[arg(long, default_value_t = DEFAULT_MAX_CONFLICT_RETRIES)]
    pub max_retries: u32,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transaction commands
    #[command(subcommand)]
    Tx(TransactionCommands),

    /// Verify that stored balances match the stored transactions
    Check,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a new user
    Create {
        /// Display name
        name: String,

        /// Email address (must be unique)
        #[arg(short, long)]
        email: String,

        /// Base currency code (e.g., EUR, USD)
        #[arg(short, long, default_value = "EUR")]
        currency: String,
    },

    /// List all users
    List,

    /// Show a user and their accounts
    Show {
        /// User ID
        id: String,
    },

    /// Delete a user together with all of their accounts
    Delete {
        /// User ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account for a user
    Open {
        /// Account name
        name: String,

        /// Owning user ID
        #[arg(short, long)]
        user: String,
    },

    /// Show an account with its category balances
    Show {
        /// Account ID
        id: String,

        /// Print the whole account as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register a category on an account with a zero balance
    Category {
        /// Account ID
        id: String,

        /// Category ID
        category: i64,
    },

    /// Delete an account and its transactions
    Close {
        /// Account ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum TransactionCommands {
    /// Record an income or expense
    Add {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Account ID
        #[arg(short, long)]
        account: String,

        /// Category ID
        #[arg(short, long)]
        category: i64,

        /// Transaction type: income or expense
        #[arg(short = 't', long = "type")]
        kind: String,

        /// Date of the transaction (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Free-text note
        #[arg(long)]
        comment: Option<String>,
    },

    /// Show one transaction
    Show {
        /// Account ID
        account: String,

        /// Transaction ID
        id: String,
    },

    /// List an account's transactions
    List {
        /// Account ID
        account: String,

        /// Filter by category
        #[arg(short, long)]
        category: Option<i64>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<String>,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete a transaction from the category it was recorded under
    Delete {
        /// Account ID
        account: String,

        /// Transaction ID
        id: String,

        /// Category the transaction was recorded under
        #[arg(short, long)]
        category: i64,
    },
}

impl Cli {
    pub fn config(&self) -> LedgerConfig {
        LedgerConfig::new(&self.database)
            .with_category_policy(self.category_policy)
            .with_max_conflict_retries(self.max_retries)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        if matches!(self.command, Commands::Init) {
            LedgerService::init(config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(config).await?;
        match self.command {
            Commands::Init => {}
            Commands::User(cmd) => run_user_command(&service, cmd).await?,
            Commands::Account(cmd) => run_account_command(&service, cmd).await?,
            Commands::Tx(cmd) => run_transaction_command(&service, cmd).await?,
            Commands::Check => run_check_command(&service).await?,
        }

        Ok(())
    }
}

async fn run_user_command(service: &LedgerService, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            name,
            email,
            currency,
        } => {
            let user = service.create_user(name, email, currency).await?;
            println!("Created user: {} <{}> ({})", user.name, user.email, user.id);
        }

        UserCommands::List => {
            let users = service.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<38} {:<20} {:<28} {:>8}", "ID", "NAME", "EMAIL", "ACCOUNTS");
                println!("{}", "-".repeat(97));
                for user in users {
                    println!(
                        "{:<38} {:<20} {:<28} {:>8}",
                        user.id,
                        truncate(&user.name, 20),
                        truncate(&user.email, 28),
                        user.accounts.len()
                    );
                }
            }
        }

        UserCommands::Show { id } => {
            let user = service.get_user(parse_user_id(&id)?).await?;

            println!("User: {}", user.name);
            println!("  ID:        {}", user.id);
            println!("  Email:     {}", user.email);
            println!("  Currency:  {}", user.base_currency);
            println!("  Created:   {}", user.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!();
            if user.accounts.is_empty() {
                println!("  No accounts.");
            } else {
                println!("  Accounts:");
                for account_id in &user.accounts {
                    let account = service.get_account(*account_id).await?;
                    println!(
                        "    {} {:<20} {:>14} {}",
                        account.id(),
                        truncate(account.name(), 20),
                        format_amount(account.balance()),
                        user.base_currency
                    );
                }
            }
        }

        UserCommands::Delete { id } => {
            let user = service.delete_user(parse_user_id(&id)?).await?;
            println!(
                "Deleted user: {} and {} account(s)",
                user.name,
                user.accounts.len()
            );
        }
    }
    Ok(())
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open { name, user } => {
            let account = service.open_account(parse_user_id(&user)?, name).await?;
            println!("Opened account: {} ({})", account.name(), account.id());
        }

        AccountCommands::Show { id, json } => {
            let account = service.get_account(parse_account_id(&id)?).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                print_account(&account);
            }
        }

        AccountCommands::Category { id, category } => {
            let account = service
                .open_category(parse_account_id(&id)?, CategoryId::new(category))
                .await?;
            println!(
                "Category {} on {}: {}",
                category,
                account.name(),
                format_amount(account.category_balance(CategoryId::new(category)).unwrap_or_default())
            );
        }

        AccountCommands::Close { id } => {
            let account_id = parse_account_id(&id)?;
            service.close_account(account_id).await?;
            println!("Closed account: {}", account_id);
        }
    }
    Ok(())
}

async fn run_transaction_command(service: &LedgerService, cmd: TransactionCommands) -> Result<()> {
    match cmd {
        TransactionCommands::Add {
            amount,
            account,
            category,
            kind,
            date,
            comment,
        } => {
            let amount = parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let kind = TransactionType::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!("Invalid transaction type '{}'. Valid types: income, expense", kind)
            })?;
            let date = match date {
                Some(date_str) => parse_date(&date_str).with_context(|| {
                    format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str)
                })?,
                None => Utc::now().date_naive(),
            };

            let draft = TransactionDraft {
                amount: Some(amount),
                kind: Some(kind),
                date: Some(date),
                comment,
            };

            let transaction = service
                .create_transaction(parse_account_id(&account)?, CategoryId::new(category), draft)
                .await?;

            println!(
                "Recorded {}: {} in category {} ({})",
                transaction.kind(),
                format_amount(transaction.amount()),
                transaction.category_id(),
                display_id(&transaction)
            );
        }

        TransactionCommands::Show { account, id } => {
            let transaction = service
                .get_transaction(parse_account_id(&account)?, parse_transaction_id(&id)?)
                .await?;

            println!("Transaction: {}", display_id(&transaction));
            println!("  Account:   {}", transaction.account_id());
            println!("  Category:  {}", transaction.category_id());
            println!("  Type:      {}", transaction.kind());
            println!("  Amount:    {}", format_amount(transaction.amount()));
            println!("  Date:      {}", transaction.date());
            if let Some(comment) = transaction.comment() {
                println!("  Comment:   {}", comment);
            }
        }

        TransactionCommands::List {
            account,
            category,
            from_date,
            to_date,
            limit,
        } => {
            let filter = TransactionFilter {
                category: category.map(CategoryId::new),
                from_date: from_date
                    .map(|s| parse_date(&s))
                    .transpose()
                    .context("Invalid from-date")?,
                to_date: to_date
                    .map(|s| parse_date(&s))
                    .transpose()
                    .context("Invalid to-date")?,
                limit,
            };

            let transactions = service
                .list_transactions(parse_account_id(&account)?, filter)
                .await?;

            if transactions.is_empty() {
                println!("No transactions found.");
            } else {
                println!(
                    "{:<12} {:>12} {:<8} {:>9} {:<38} COMMENT",
                    "DATE", "AMOUNT", "TYPE", "CATEGORY", "ID"
                );
                println!("{}", "-".repeat(100));
                for transaction in &transactions {
                    println!(
                        "{:<12} {:>12} {:<8} {:>9} {:<38} {}",
                        transaction.date(),
                        format_amount(transaction.signed_amount()),
                        transaction.kind(),
                        transaction.category_id(),
                        display_id(transaction),
                        truncate(transaction.comment().unwrap_or(""), 30)
                    );
                }
            }
        }

        TransactionCommands::Delete {
            account,
            id,
            category,
        } => {
            let deleted = service
                .delete_transaction(
                    parse_account_id(&account)?,
                    parse_transaction_id(&id)?,
                    CategoryId::new(category),
                )
                .await?;

            if deleted {
                println!("Deleted transaction: {}", id);
            } else {
                anyhow::bail!(
                    "No transaction {} under category {} on this account",
                    id,
                    category
                );
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:     {}", report.accounts_checked);
    println!("Transactions: {}", report.transactions_checked);
    println!();

    if report.is_healthy() {
        println!("OK: every balance matches its transactions.");
        return Ok(());
    }

    println!("Problems found:");
    for (account_id, discrepancy) in &report.problems {
        println!("  {}: {}", account_id, discrepancy);
    }
    anyhow::bail!("{} integrity problem(s) found", report.problems.len())
}

fn print_account(account: &Account) {
    println!("Account: {}", account.name());
    println!("  ID:            {}", account.id());
    println!("  Owner:         {}", account.user_id());
    println!("  Created:       {}", account.created_at().format("%Y-%m-%d %H:%M:%S"));
    println!("  Transactions:  {}", account.len());
    println!("  Balance:       {}", format_amount(account.balance()));

    let categories = account.category_balances();
    if !categories.is_empty() {
        println!();
        println!("  {:>10} {:>14}", "CATEGORY", "BALANCE");
        for (category, balance) in categories {
            println!("  {:>10} {:>14}", category, format_amount(balance));
        }
    }
}

fn display_id(transaction: &Transaction) -> String {
    transaction
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").context("Date must be in YYYY-MM-DD format")
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} ID format (expected UUID)", what))
}

fn parse_user_id(value: &str) -> Result<UserId> {
    Ok(parse_uuid(value, "user")?.into())
}

fn parse_account_id(value: &str) -> Result<AccountId> {
    Ok(parse_uuid(value, "account")?.into())
}

fn parse_transaction_id(value: &str) -> Result<TransactionId> {
    Ok(parse_uuid(value, "transaction")?.into())
}
