//! Error types for session operations.

use thiserror::Error;

use crate::Amount;
use crate::model::AccountId;

/// A rejected session operation. None of these change any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotAuthenticated,

    #[error("already logged in as {0}")]
    AlreadyAuthenticated(AccountId),

    #[error("session closed")]
    Closed,

    #[error("account {0} does not exist")]
    UnknownAccount(AccountId),

    #[error("account {0} is blocked")]
    AccountBlocked(AccountId),

    #[error("destination account {0} does not exist")]
    UnknownDestination(AccountId),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Amount, requested: Amount },

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Amount),

    #[error("balance of account {0} would overflow")]
    Overflow(AccountId),
}
