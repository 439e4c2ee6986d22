use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE: &str = "cashflow.db";
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens when a transaction names a category the account has not
/// registered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryPolicy {
    /// Start the category at zero and record the transaction
    #[default]
    AutoCreate,
    /// Reject the transaction unless the category was opened first
    Registered,
}

/// Runtime settings for the ledger service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub database_path: PathBuf,
    pub category_policy: CategoryPolicy,
    /// How many times a save that lost an optimistic version race is
    /// reloaded and reapplied before giving up
    pub max_conflict_retries: u32,
    pub busy_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE)
    }
}

impl LedgerConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            category_policy: CategoryPolicy::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_category_policy(mut self, policy: CategoryPolicy) -> Self {
        self.category_policy = policy;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// SQLite URL for the database file. With `create`, a missing file is
    /// created.
    pub fn database_url(&self, create: bool) -> String {
        let path = self.database_path.display();
        if create {
            format!("sqlite:{}?mode=rwc", path)
        } else {
            format!("sqlite:{}", path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.database_path, PathBuf::from("cashflow.db"));
        assert_eq!(config.category_policy, CategoryPolicy::AutoCreate);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_database_url() {
        let config = LedgerConfig::new("/tmp/ledger.db");
        assert_eq!(config.database_url(true), "sqlite:/tmp/ledger.db?mode=rwc");
        assert_eq!(config.database_url(false), "sqlite:/tmp/ledger.db");
    }

    #[test]
    fn test_policy_parses_from_cli_value() {
        assert_eq!(
            CategoryPolicy::from_str("registered", true),
            Ok(CategoryPolicy::Registered)
        );
        assert_eq!(
            CategoryPolicy::from_str("auto-create", true),
            Ok(CategoryPolicy::AutoCreate)
        );
    }
}
