use std::ops::DerefMut;

use parking_lot::{Mutex, MutexGuard};

use super::Ledger;

/// Exclusive access to the shared [`Ledger`].
///
/// `acquire` blocks until no other holder remains; dropping the guard
/// releases the gate. There is no reader/writer split: pure reads take the
/// same exclusive gate as mutations.
pub trait Gate: Send + Sync + 'static {
    type Guard<'a>: DerefMut<Target = Ledger>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_>;

    /// Run `f` with the gate held and release it before returning.
    ///
    /// Async callers go through this so a guard can never be held across an
    /// `.await`.
    fn with<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut guard = self.acquire();
        f(&mut *guard)
    }
}

/// In-process gate backed by a `parking_lot` mutex.
#[derive(Debug, Default)]
pub struct MutexGate {
    ledger: Mutex<Ledger>,
}

impl MutexGate {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
        }
    }

    pub fn into_inner(self) -> Ledger {
        self.ledger.into_inner()
    }
}

impl Gate for MutexGate {
    type Guard<'a> = MutexGuard<'a, Ledger>;

    fn acquire(&self) -> Self::Guard<'_> {
        self.ledger.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{Account, Priority};
    use crate::store::AccountStore;
    use std::sync::Arc;
    use std::thread;

    fn gate_with_account(balance: i64) -> MutexGate {
        let accounts =
            AccountStore::from_accounts(vec![Account::new(1, "t", Amount::from_units(balance))])
                .unwrap();
        MutexGate::new(Ledger::new(accounts))
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let gate = Arc::new(gate_with_account(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        gate.with(|ledger| {
                            let account = ledger.accounts.get_mut(1).unwrap();
                            account.balance += Amount::from_units(1);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ledger = Arc::try_unwrap(gate).unwrap().into_inner();
        assert_eq!(ledger.accounts.get(1).unwrap().balance, Amount::from_units(8000));
    }

    #[test]
    fn store_and_buffer_change_under_one_acquisition() {
        let gate = gate_with_account(10);
        {
            let mut ledger = gate.acquire();
            let account = ledger.accounts.get_mut(1).unwrap();
            account.balance = Amount::from_units(20);
            let copy = account.clone();
            assert!(ledger.pending.push(&copy, Priority::High));
        }

        let ledger = gate.acquire();
        let queued = ledger.pending.iter().next().unwrap();
        assert_eq!(queued.account.balance, ledger.accounts.get(1).unwrap().balance);
    }
}
