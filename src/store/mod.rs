//! Shared in-memory state: the account table and the write-back buffer,
//! both guarded by a single [`Gate`].

mod accounts;
mod buffer;
mod gate;

pub use accounts::{AccountStore, MAX_ACCOUNTS};
pub use buffer::{BUFFER_CAPACITY, WriteBackBuffer};
pub use gate::{Gate, MutexGate};

use thiserror::Error;

use crate::model::{AccountId, Priority};

/// Errors raised while building the account store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("account store is full ({0} accounts)")]
    Full(usize),
    #[error("duplicate account id {0}")]
    DuplicateAccount(AccountId),
}

/// Everything the gate protects.
///
/// The account table and the pending snapshots share one lock so that a
/// queued snapshot always carries a balance the table has committed.
#[derive(Debug, Default)]
pub struct Ledger {
    pub accounts: AccountStore,
    pub pending: WriteBackBuffer,
}

impl Ledger {
    pub fn new(accounts: AccountStore) -> Self {
        Self {
            accounts,
            pending: WriteBackBuffer::new(),
        }
    }

    /// Queue a snapshot of account `id`. Returns `false` when the account is
    /// unknown or the buffer is full.
    pub fn touch(&mut self, id: AccountId, priority: Priority) -> bool {
        match self.accounts.get(id) {
            Some(account) => self.pending.push(account, priority),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::Account;

    #[test]
    fn touch_queues_current_state() {
        let accounts =
            AccountStore::from_accounts(vec![Account::new(5, "t", Amount::from_units(3))]).unwrap();
        let mut ledger = Ledger::new(accounts);

        assert!(ledger.touch(5, Priority::High));
        assert!(!ledger.touch(6, Priority::High));

        let snapshot = ledger.pending.pop_front().unwrap();
        assert_eq!(snapshot.account.balance, Amount::from_units(3));
        assert!(ledger.pending.is_empty());
    }
}
