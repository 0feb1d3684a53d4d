//! Session engine.
//!
//! A session moves through `Unauthenticated -> Authenticated -> Closed`.
//! Every operation follows the same shape:
//! - take the gate, check, mutate the account store and queue snapshots
//! - release the gate
//! - append to the account's private history and emit a transaction event
//!
//! Rejected operations release the gate without touching anything and emit
//! nothing. Side effects after the gate never fail the operation.
//!
//! Withdrawal and transfer ceilings are the caller's concern; amounts reaching
//! this layer are only checked for sign and funds.

use std::sync::Arc;

use tracing::{debug, info};

use crate::Amount;
use crate::event::{EventSender, TransactionEvent};
use crate::journal::Journal;
use crate::model::{AccountId, Priority};
use crate::store::{Gate, Ledger};

mod error;
pub use error::SessionError;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(AccountId),
    Closed,
}

/// Result of a committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Applied {
    /// Balance of the session account after the operation.
    balance: Amount,
    /// False if at least one snapshot was dropped by a full buffer.
    queued: bool,
}

/// Hands out sessions wired to the same ledger, journal and event channel.
pub struct SessionFactory<G: Gate> {
    ledger: Arc<G>,
    journal: Journal,
    events: EventSender,
}

impl<G: Gate> SessionFactory<G> {
    pub fn new(ledger: Arc<G>, journal: Journal, events: EventSender) -> Self {
        Self {
            ledger,
            journal,
            events,
        }
    }

    pub fn open(&self) -> Session<G> {
        Session::new(
            Arc::clone(&self.ledger),
            self.journal.clone(),
            self.events.clone(),
        )
    }
}

impl<G: Gate> Clone for SessionFactory<G> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            journal: self.journal.clone(),
            events: self.events.clone(),
        }
    }
}

/// One client's banking session over the shared ledger.
pub struct Session<G: Gate> {
    ledger: Arc<G>,
    journal: Journal,
    events: EventSender,
    state: SessionState,
}

/// Public API
impl<G: Gate> Session<G> {
    pub fn new(ledger: Arc<G>, journal: Journal, events: EventSender) -> Self {
        Self {
            ledger,
            journal,
            events,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The logged-in account, if any.
    pub fn account(&self) -> Option<AccountId> {
        match self.state {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    /// Log in as `id`. The account must exist and not be blocked.
    pub fn authenticate(&mut self, id: AccountId) -> Result<(), SessionError> {
        match self.state {
            SessionState::Unauthenticated => {}
            SessionState::Authenticated(current) => {
                return Err(SessionError::AlreadyAuthenticated(current));
            }
            SessionState::Closed => return Err(SessionError::Closed),
        }

        let blocked = self
            .ledger
            .with(|ledger| ledger.accounts.get(id).map(|account| account.blocked));
        match blocked {
            None => Err(SessionError::UnknownAccount(id)),
            Some(true) => Err(SessionError::AccountBlocked(id)),
            Some(false) => {
                self.state = SessionState::Authenticated(id);
                info!(account = id, "session authenticated");
                Ok(())
            }
        }
    }

    pub fn close(&mut self) {
        if let SessionState::Authenticated(id) = self.state {
            info!(account = id, "session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Credit `amount` to the session account. Returns the new balance.
    pub async fn deposit(&mut self, amount: Amount) -> Result<Amount, SessionError> {
        let account = self.current()?;
        ensure_positive(amount)?;

        let applied = self
            .ledger
            .with(|ledger| apply_deposit(ledger, account, amount))?;
        self.after_commit(account, applied);

        self.journal
            .record_for(account, &format!("Deposit: +{amount}"))
            .await;
        self.events
            .send(&TransactionEvent::Deposit { account, amount });
        Ok(applied.balance)
    }

    /// Debit `amount` from the session account if the balance covers it.
    pub async fn withdraw(&mut self, amount: Amount) -> Result<Amount, SessionError> {
        let account = self.current()?;
        ensure_positive(amount)?;

        let applied = self
            .ledger
            .with(|ledger| apply_withdrawal(ledger, account, amount))?;
        self.after_commit(account, applied);

        self.journal
            .record_for(account, &format!("Withdrawal: -{amount}"))
            .await;
        self.events
            .send(&TransactionEvent::Withdrawal { account, amount });
        Ok(applied.balance)
    }

    /// Move `amount` from the session account to `to`.
    pub async fn transfer(&mut self, to: AccountId, amount: Amount) -> Result<Amount, SessionError> {
        let from = self.current()?;
        ensure_positive(amount)?;

        let applied = self
            .ledger
            .with(|ledger| apply_transfer(ledger, from, to, amount))?;
        self.after_commit(from, applied);

        self.journal
            .record_for(from, &format!("Transfer to {to}: -{amount}"))
            .await;
        self.events
            .send(&TransactionEvent::Transfer { from, to, amount });
        Ok(applied.balance)
    }

    /// Current balance of the session account.
    ///
    /// Also queues a snapshot of the account: every observation is written
    /// back, like a mutation.
    pub fn balance(&self) -> Result<Amount, SessionError> {
        let account = self.current()?;
        let applied = self.ledger.with(|ledger| {
            let balance = ledger
                .accounts
                .get(account)
                .map(|a| a.balance)
                .ok_or(SessionError::UnknownAccount(account))?;
            let queued = ledger.touch(account, Priority::High);
            Ok::<_, SessionError>(Applied { balance, queued })
        })?;
        self.after_commit(account, applied);
        Ok(applied.balance)
    }
}

/// Private API
impl<G: Gate> Session<G> {
    fn current(&self) -> Result<AccountId, SessionError> {
        match self.state {
            SessionState::Authenticated(id) => Ok(id),
            SessionState::Unauthenticated => Err(SessionError::NotAuthenticated),
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    /// Runs with the gate released.
    fn after_commit(&self, account: AccountId, applied: Applied) {
        if !applied.queued {
            debug!(account, "write-back buffer full, snapshot dropped");
        }
    }
}

fn ensure_positive(amount: Amount) -> Result<(), SessionError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(SessionError::InvalidAmount(amount))
    }
}

/// Credit the account and queue its snapshot. Caller holds the gate.
fn apply_deposit(
    ledger: &mut Ledger,
    account: AccountId,
    amount: Amount,
) -> Result<Applied, SessionError> {
    let target = ledger
        .accounts
        .get_mut(account)
        .ok_or(SessionError::UnknownAccount(account))?;
    let balance = target
        .balance
        .checked_add(amount)
        .ok_or(SessionError::Overflow(account))?;

    target.balance = balance;
    let queued = ledger.pending.push(target, Priority::High);
    Ok(Applied { balance, queued })
}

/// Debit the account if it covers `amount`. Caller holds the gate.
fn apply_withdrawal(
    ledger: &mut Ledger,
    account: AccountId,
    amount: Amount,
) -> Result<Applied, SessionError> {
    let target = ledger
        .accounts
        .get_mut(account)
        .ok_or(SessionError::UnknownAccount(account))?;
    if target.balance < amount {
        return Err(SessionError::InsufficientFunds {
            balance: target.balance,
            requested: amount,
        });
    }

    target.balance -= amount;
    let balance = target.balance;
    let queued = ledger.pending.push(target, Priority::High);
    Ok(Applied { balance, queued })
}

/// Debit `from`, credit `to`, queue both snapshots (source first).
/// Caller holds the gate.
///
/// A transfer to the same account debits then credits it, leaving the
/// balance unchanged.
fn apply_transfer(
    ledger: &mut Ledger,
    from: AccountId,
    to: AccountId,
    amount: Amount,
) -> Result<Applied, SessionError> {
    let dest_balance = ledger
        .accounts
        .get(to)
        .map(|a| a.balance)
        .ok_or(SessionError::UnknownDestination(to))?;
    let source_balance = ledger
        .accounts
        .get(from)
        .map(|a| a.balance)
        .ok_or(SessionError::UnknownAccount(from))?;

    if source_balance < amount {
        return Err(SessionError::InsufficientFunds {
            balance: source_balance,
            requested: amount,
        });
    }
    if from != to && dest_balance.checked_add(amount).is_none() {
        return Err(SessionError::Overflow(to));
    }

    let mut queued = true;
    if let Some(source) = ledger.accounts.get_mut(from) {
        source.balance -= amount;
        queued &= ledger.pending.push(source, Priority::High);
    }
    if let Some(dest) = ledger.accounts.get_mut(to) {
        dest.balance += amount;
        queued &= ledger.pending.push(dest, Priority::High);
    }

    let balance = if from == to {
        source_balance
    } else {
        source_balance - amount
    };
    Ok(Applied { balance, queued })
}
