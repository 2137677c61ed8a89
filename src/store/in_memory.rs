use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::{Account, AccountStore, StoreError};
use crate::core_types::AccountId;

/// A thread-safe in-memory account store.
///
/// Each entry carries a version that is bumped on every successful save, so
/// concurrent writers racing on the same account see real conflicts.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<DashMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `(id, balance)` pairs at version 0
    pub fn with_accounts(accounts: impl IntoIterator<Item = (AccountId, Decimal)>) -> Self {
        let store = Self::new();
        for (id, balance) in accounts {
            store.insert(Account::new(id, balance));
        }
        store
    }

    /// Insert or replace an account as-is (bootstrap and tests only)
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn remove(&self, id: AccountId) -> Option<Account> {
        self.accounts.remove(&id).map(|(_, account)| account)
    }

    pub fn balance(&self, id: AccountId) -> Option<Decimal> {
        self.accounts.get(&id).map(|entry| entry.balance)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&id).map(|entry| entry.clone()))
    }

    async fn save_account(&self, account: &Account) -> Result<Account, StoreError> {
        // Entry lock makes the version check and the write one atomic step
        let Some(mut entry) = self.accounts.get_mut(&account.id) else {
            return Err(StoreError::ConcurrencyConflict(format!(
                "account {} no longer exists",
                account.id
            )));
        };

        if entry.version != account.version {
            return Err(StoreError::ConcurrencyConflict(format!(
                "account {} expected version {}, found {}",
                account.id, account.version, entry.version
            )));
        }

        entry.balance = account.balance;
        entry.version += 1;
        Ok(entry.clone())
    }
}
