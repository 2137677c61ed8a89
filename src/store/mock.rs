//! Scriptable account store for processor tests
//!
//! Faults and simulated concurrent writes are scheduled against call numbers
//! (1-based, counted separately for finds and saves).

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Account, AccountStore, InMemoryAccountStore, StoreError};
use crate::core_types::AccountId;

pub struct MockAccountStore {
    inner: InMemoryAccountStore,
    find_faults: Mutex<Vec<(usize, StoreError)>>,
    /// Returned before anything is written
    save_faults: Mutex<Vec<(usize, StoreError)>>,
    /// Returned after the save has been written
    landed_save_faults: Mutex<Vec<(usize, StoreError)>>,
    /// Finds preceded by another writer deleting the account
    removals_before_find: Mutex<Vec<(usize, ())>>,
    /// Deltas another writer commits right before the numbered find
    writes_before_find: Mutex<Vec<(usize, Decimal)>>,
    /// Deltas another writer commits right before the numbered save
    writes_before_save: Mutex<Vec<(usize, Decimal)>>,
    find_count: AtomicUsize,
    save_count: AtomicUsize,
}

/// Remove and return the entry scheduled for call `n`
fn take_at<T>(slots: &Mutex<Vec<(usize, T)>>, n: usize) -> Option<T> {
    let mut slots = slots.lock().unwrap();
    let idx = slots.iter().position(|(at, _)| *at == n)?;
    Some(slots.remove(idx).1)
}

impl MockAccountStore {
    pub fn new(inner: InMemoryAccountStore) -> Self {
        Self {
            inner,
            find_faults: Mutex::new(Vec::new()),
            save_faults: Mutex::new(Vec::new()),
            landed_save_faults: Mutex::new(Vec::new()),
            removals_before_find: Mutex::new(Vec::new()),
            writes_before_find: Mutex::new(Vec::new()),
            writes_before_save: Mutex::new(Vec::new()),
            find_count: AtomicUsize::new(0),
            save_count: AtomicUsize::new(0),
        }
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = (AccountId, Decimal)>) -> Self {
        Self::new(InMemoryAccountStore::with_accounts(accounts))
    }

    pub fn inner(&self) -> &InMemoryAccountStore {
        &self.inner
    }

    pub fn balance(&self, id: AccountId) -> Option<Decimal> {
        self.inner.balance(id)
    }

    pub fn fail_next_find(&self, err: StoreError) {
        self.fail_find_at(self.find_count() + 1, err);
    }

    pub fn fail_find_at(&self, find: usize, err: StoreError) {
        self.find_faults.lock().unwrap().push((find, err));
    }

    pub fn fail_next_save(&self, err: StoreError) {
        self.save_faults
            .lock()
            .unwrap()
            .push((self.save_count() + 1, err));
    }

    /// The numbered save is written, then reports `err` as if the reply was lost
    pub fn fail_after_save_at(&self, save: usize, err: StoreError) {
        self.landed_save_faults.lock().unwrap().push((save, err));
    }

    /// Another writer deletes the account right before the numbered find
    pub fn remove_before_find(&self, find: usize) {
        self.removals_before_find.lock().unwrap().push((find, ()));
    }

    /// Another writer adds `delta` to the account right before the next save
    pub fn interleave_write(&self, delta: Decimal) {
        self.interleave_write_at(self.save_count() + 1, delta);
    }

    pub fn interleave_write_at(&self, save: usize, delta: Decimal) {
        self.writes_before_save.lock().unwrap().push((save, delta));
    }

    pub fn interleave_write_before_find(&self, find: usize, delta: Decimal) {
        self.writes_before_find.lock().unwrap().push((find, delta));
    }

    pub fn find_count(&self) -> usize {
        self.find_count.load(Ordering::SeqCst)
    }

    /// Number of save attempts, including failed ones
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    async fn concurrent_write(&self, id: AccountId, delta: Decimal) -> Result<(), StoreError> {
        if let Some(mut current) = self.inner.find_account(id).await? {
            current.balance += delta;
            self.inner.save_account(&current).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MockAccountStore {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let find = self.find_count.fetch_add(1, Ordering::SeqCst) + 1;

        if take_at(&self.removals_before_find, find).is_some() {
            self.inner.remove(id);
        }
        if let Some(delta) = take_at(&self.writes_before_find, find) {
            self.concurrent_write(id, delta).await?;
        }
        if let Some(err) = take_at(&self.find_faults, find) {
            return Err(err);
        }
        self.inner.find_account(id).await
    }

    async fn save_account(&self, account: &Account) -> Result<Account, StoreError> {
        let save = self.save_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delta) = take_at(&self.writes_before_save, save) {
            self.concurrent_write(account.id, delta).await?;
        }
        if let Some(err) = take_at(&self.save_faults, save) {
            return Err(err);
        }
        let saved = self.inner.save_account(account).await?;
        if let Some(err) = take_at(&self.landed_save_faults, save) {
            return Err(err);
        }
        Ok(saved)
    }
}
