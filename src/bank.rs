//! Owning runtime: loads the account file, starts the drain loop and the
//! fraud monitor, hands out sessions, and tears everything down in order.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::csv::CsvError;
use crate::drain::DrainLoop;
use crate::event::{self, EventSender};
use crate::journal::Journal;
use crate::model::Account;
use crate::monitor::{FraudDetector, Monitor};
use crate::session::{Session, SessionFactory};
use crate::storage::{self, StorageError};
use crate::store::{AccountStore, Gate, Ledger, MutexGate, StoreError};

/// How long the monitor may keep draining events after the channel closes.
pub const MONITOR_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BankError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error("{0} already exists, use --force to overwrite")]
    AlreadyExists(PathBuf),

    #[error("cannot listen on {addr}: {source}")]
    Listen { addr: String, source: io::Error },
}

pub struct Bank {
    config: Config,
    ledger: Arc<MutexGate>,
    journal: Journal,
    events: EventSender,
    drain_cancel: CancellationToken,
    drain: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl Bank {
    /// Load the account file and spawn the background tasks.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(config: Config) -> Result<Self, BankError> {
        let accounts = storage::load_accounts(&config.accounts_path)?;
        let count = accounts.len();
        let ledger = Arc::new(MutexGate::new(Ledger::new(AccountStore::from_accounts(
            accounts,
        )?)));
        let journal = Journal::new(&config.log_path, &config.history_dir);

        let drain_cancel = CancellationToken::new();
        let drain = DrainLoop::new(Arc::clone(&ledger), &config.accounts_path)
            .with_interval(config.drain_interval);
        let drain = tokio::spawn(drain.run(drain_cancel.clone()));

        let (events, rx) = event::channel();
        let mut monitor = Monitor::new(
            FraudDetector::new(
                config.withdrawal_alert_threshold,
                config.transfer_alert_threshold,
            ),
            journal.clone(),
        );
        let monitor = tokio::spawn(async move {
            monitor.run(ReceiverStream::new(rx)).await;
        });

        info!(
            accounts = count,
            path = %config.accounts_path.display(),
            "bank started"
        );

        Ok(Self {
            config,
            ledger,
            journal,
            events,
            drain_cancel,
            drain,
            monitor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<MutexGate> {
        &self.ledger
    }

    pub fn sessions(&self) -> SessionFactory<MutexGate> {
        SessionFactory::new(
            Arc::clone(&self.ledger),
            self.journal.clone(),
            self.events.clone(),
        )
    }

    pub fn open_session(&self) -> Session<MutexGate> {
        self.sessions().open()
    }

    /// Copy of every account, in store order.
    pub fn accounts(&self) -> Vec<Account> {
        self.ledger.with(|ledger| ledger.accounts.as_slice().to_vec())
    }

    /// Stop the drain loop, rewrite the whole account file and let the
    /// monitor finish.
    ///
    /// Sessions still holding an event sender keep the monitor alive until
    /// the grace period runs out.
    pub async fn shutdown(self) {
        let Bank {
            config,
            ledger,
            events,
            drain_cancel,
            drain,
            mut monitor,
            ..
        } = self;

        drain_cancel.cancel();
        if let Err(e) = drain.await {
            warn!(error = %e, "drain loop ended abnormally");
        }

        let (accounts, pending, dropped) = ledger.with(|ledger| {
            (
                ledger.accounts.as_slice().to_vec(),
                ledger.pending.len(),
                ledger.pending.dropped(),
            )
        });
        if pending > 0 || dropped > 0 {
            info!(pending, dropped, "snapshots superseded by the final save");
        }
        let path = config.accounts_path.clone();
        let saved = tokio::task::spawn_blocking(move || {
            storage::save_all(&path, &accounts).map(|()| accounts.len())
        })
        .await;
        match saved {
            Ok(Ok(count)) => info!(accounts = count, "account file saved"),
            Ok(Err(e)) => warn!(error = %e, "final save failed"),
            Err(e) => warn!(error = %e, "final save task failed"),
        }

        drop(events);
        if tokio::time::timeout(MONITOR_GRACE, &mut monitor).await.is_err() {
            warn!("monitor still busy after grace period, aborting");
            monitor.abort();
        }
        info!("bank stopped");
    }
}

/// Write a fresh account file. Refuses to replace an existing one unless
/// `force` is set.
pub fn init_accounts(
    path: &Path,
    accounts: Vec<Account>,
    force: bool,
) -> Result<usize, BankError> {
    if path.exists() && !force {
        return Err(BankError::AlreadyExists(path.to_path_buf()));
    }
    let store = AccountStore::from_accounts(accounts)?;
    storage::save_all(path, store.as_slice())?;
    Ok(store.len())
}
