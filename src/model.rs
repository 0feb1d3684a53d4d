//! Core domain types shared by the store, sessions and the drain loop.

use crate::Amount;

/// Account identifier, stable for the lifetime of the process.
pub type AccountId = u32;

/// A bank account as held in the account store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    /// Display name of the account holder.
    pub holder: String,
    pub balance: Amount,
    /// Blocked accounts cannot open a session.
    pub blocked: bool,
}

impl Account {
    pub fn new(id: AccountId, holder: impl Into<String>, balance: Amount) -> Self {
        Self {
            id,
            holder: holder.into(),
            balance,
            blocked: false,
        }
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }
}

/// Persistence priority of a queued snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Copy of one account taken at mutation time, waiting to be written back.
///
/// Snapshots own their data, so the drain loop never sees an account that a
/// session is still modifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub priority: Priority,
    pub account: Account,
}

impl Snapshot {
    pub fn new(account: &Account, priority: Priority) -> Self {
        Self {
            priority,
            account: account.clone(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }

    #[test]
    fn snapshot_is_detached_from_account() {
        let mut account = Account::new(1001, "John Doe", Amount::from_units(5000));
        let snapshot = Snapshot::new(&account, Priority::High);

        account.balance = Amount::ZERO;

        assert_eq!(snapshot.account.balance, Amount::from_units(5000));
        assert_eq!(snapshot.account_id(), 1001);
    }

    #[test]
    fn new_account_is_not_blocked() {
        let account = Account::new(7, "x", Amount::ZERO);
        assert!(!account.blocked);
        assert!(account.blocked().blocked);
    }
}
