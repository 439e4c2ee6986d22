use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The owner of zero or more accounts. Deleting a user deletes every
/// account listed in `accounts`, and their transactions with them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub base_currency: String,
    pub created_at: DateTime<Utc>,
    pub accounts: Vec<AccountId>,
}

impl User {
    pub fn new(name: String, email: String, base_currency: String) -> Self {
        Self {
            id: UserId::new(),
            name,
            email,
            base_currency: base_currency.to_uppercase(),
            created_at: Utc::now(),
            accounts: Vec::new(),
        }
    }

    pub fn with_accounts(mut self, accounts: Vec<AccountId>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn owns(&self, account: AccountId) -> bool {
        self.accounts.contains(&account)
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_owns_nothing() {
        let user = User::new("Dana".into(), "dana@example.com".into(), "eur".into());
        assert!(user.accounts.is_empty());
        assert_eq!(user.base_currency, "EUR");
    }

    #[test]
    fn test_owns() {
        let account = AccountId::new();
        let user = User::new("Dana".into(), "dana@example.com".into(), "EUR".into())
            .with_accounts(vec![account]);

        assert!(user.owns(account));
        assert!(!user.owns(AccountId::new()));
    }
}
