//! Account Store
//!
//! Persistence seam for bank accounts with optimistic concurrency control.
//!
//! # Contract
//!
//! - Every read returns the account together with its current `version`.
//! - `save_account` succeeds only if the stored version still equals the
//!   version carried by the account being saved, and bumps it by one.
//!   Otherwise it fails with [`StoreError::ConcurrencyConflict`].
//! - A failed save leaves the stored row untouched.
//! - Backend failures are translated into the closed [`StoreError`] set at the
//!   adapter boundary; callers never inspect backend error types.

pub mod in_memory;
pub mod postgres;

#[cfg(test)]
pub mod mock;

pub use in_memory::InMemoryAccountStore;
pub use postgres::PostgresAccountStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{AccountId, Version};

/// A bank account as seen by the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    /// Row stamp captured on read, checked on write
    pub version: Version,
}

impl Account {
    pub fn new(id: AccountId, balance: Decimal) -> Self {
        Self {
            id,
            balance,
            version: 0,
        }
    }
}

/// Store failures, already classified by the adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The account changed (or vanished) since it was read
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid store operation: {0}")]
    InvalidOperation(String),

    #[error("Store error: {0}")]
    Other(String),
}

/// Account persistence with optimistic version checks
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Look up an account. `Ok(None)` when it does not exist.
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Persist `account.balance` if `account.version` is still current.
    ///
    /// Returns the stored account carrying its new version.
    async fn save_account(&self, account: &Account) -> Result<Account, StoreError>;
}
