// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::str::FromStr;

use anyhow::Result;
use cashflow::application::LedgerService;
use cashflow::{Account, Amount, LedgerConfig, Repository, User};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::TempDir;

/// Config pointing at a fresh database inside `temp_dir`
pub fn test_config(temp_dir: &TempDir) -> LedgerConfig {
    LedgerConfig::new(temp_dir.path().join("test.db"))
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(test_config(&temp_dir)).await?;
    Ok((service, temp_dir))
}

/// Helper to create a test service with a custom config
pub async fn test_service_with(
    configure: impl FnOnce(LedgerConfig) -> LedgerConfig,
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(configure(test_config(&temp_dir))).await?;
    Ok((service, temp_dir))
}

/// Open a second connection pool on the same database, bypassing the service
pub async fn raw_repository(temp_dir: &TempDir) -> Result<Repository> {
    let config = test_config(temp_dir);
    Repository::connect(&config.database_url(false), config.busy_timeout).await
}

/// Helper to parse a date string
pub fn date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Helper to write exact decimal amounts
pub fn d(s: &str) -> Amount {
    Decimal::from_str(s).unwrap()
}

/// Test fixture: one user with one empty account
pub async fn setup_account(service: &LedgerService) -> Result<(User, Account)> {
    let user = service
        .create_user("Alice".into(), "alice@example.com".into(), "EUR".into())
        .await?;
    let account = service.open_account(user.id, "Checking".into()).await?;
    Ok((user, account))
}
