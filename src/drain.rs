//! Drain loop: persists queued snapshots one record at a time.
//!
//! The gate is held only to pop the head snapshot and to resolve the record
//! offset of its account. The disk write happens with the gate released.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::AccountId;
use crate::storage;
use crate::store::Gate;

/// Idle polling interval used when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(20);

/// What happened to one popped snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Record `index` of the account file now holds the snapshot.
    Written { account: AccountId, index: usize },
    /// The account no longer resolves to a record; snapshot dropped.
    Unresolved(AccountId),
    /// The write failed; snapshot dropped.
    Failed(AccountId),
}

pub struct DrainLoop<G: Gate> {
    ledger: Arc<G>,
    path: PathBuf,
    interval: Duration,
}

impl<G: Gate> DrainLoop<G> {
    pub fn new(ledger: Arc<G>, path: impl Into<PathBuf>) -> Self {
        Self {
            ledger,
            path: path.into(),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll the buffer until `cancel` fires.
    ///
    /// Cancellation is checked between entries, so an in-flight write
    /// completes before the loop returns.
    pub async fn run(self, cancel: CancellationToken) {
        info!(path = %self.path.display(), interval = ?self.interval, "drain loop started");
        let mut written = 0u64;

        while !cancel.is_cancelled() {
            match self.drain_once().await {
                Some(DrainOutcome::Written { .. }) => written += 1,
                Some(_) => {}
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.interval) => {}
                    }
                }
            }
        }

        info!(written, "drain loop stopped");
    }

    /// Persist the head snapshot, if any. `None` means the buffer was empty.
    pub async fn drain_once(&self) -> Option<DrainOutcome> {
        let snapshot = self.ledger.with(|ledger| ledger.pending.pop_front())?;
        let account = snapshot.account_id();

        let Some(index) = self
            .ledger
            .with(|ledger| ledger.accounts.position(account))
        else {
            debug!(account, "snapshot for unknown account dropped");
            return Some(DrainOutcome::Unresolved(account));
        };

        match storage::write_record(&self.path, index, &snapshot.account).await {
            Ok(()) => Some(DrainOutcome::Written { account, index }),
            Err(e) => {
                warn!(account, error = %e, "record write failed, snapshot dropped");
                Some(DrainOutcome::Failed(account))
            }
        }
    }
}
