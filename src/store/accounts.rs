use crate::model::{Account, AccountId};

use super::StoreError;

/// Maximum number of accounts the store can hold.
pub const MAX_ACCOUNTS: usize = 100;

/// Fixed-capacity, ordered table of accounts.
///
/// Position in the table is also the record index in the account file, so
/// accounts are never removed or reordered while the process runs.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: Vec<Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self {
            accounts: Vec::with_capacity(MAX_ACCOUNTS),
        }
    }

    /// Build a store from already loaded accounts.
    pub fn from_accounts(accounts: Vec<Account>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for account in accounts {
            store.insert(account)?;
        }
        Ok(store)
    }

    /// Append an account at the next free position.
    pub fn insert(&mut self, account: Account) -> Result<usize, StoreError> {
        if self.accounts.len() >= MAX_ACCOUNTS {
            return Err(StoreError::Full(MAX_ACCOUNTS));
        }
        if self.position(account.id).is_some() {
            return Err(StoreError::DuplicateAccount(account.id));
        }
        self.accounts.push(account);
        Ok(self.accounts.len() - 1)
    }

    /// Index of the account with the given id (its record index on disk).
    pub fn position(&self, id: AccountId) -> Option<usize> {
        self.accounts.iter().position(|a| a.id == id)
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn as_slice(&self) -> &[Account] {
        &self.accounts
    }
}
