//! Append-only, timestamped text logs.
//!
//! Used for the system log written by the monitor and for each account's
//! private transaction history. Failures are logged and swallowed.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::model::AccountId;

const TIMESTAMP_FORMAT: &str = "[%Y-%m-%d %H:%M:%S]";
const HISTORY_FILE: &str = "transactions.log";

/// Append `line` to `path`, prefixed by the local time. Parent directories
/// are created as needed.
pub async fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let stamped = format!(
        "{} {line}\n",
        chrono::Local::now().format(TIMESTAMP_FORMAT)
    );
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(stamped.as_bytes()).await?;
    file.flush().await
}

/// Where the durable logs live.
#[derive(Debug, Clone)]
pub struct Journal {
    log_path: PathBuf,
    history_dir: PathBuf,
}

impl Journal {
    pub fn new(log_path: impl Into<PathBuf>, history_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            history_dir: history_dir.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// `<history_dir>/<account>/transactions.log`
    pub fn history_path(&self, account: AccountId) -> PathBuf {
        self.history_dir
            .join(account.to_string())
            .join(HISTORY_FILE)
    }

    /// Append to the system log.
    pub async fn record(&self, line: &str) {
        if let Err(e) = append_line(&self.log_path, line).await {
            warn!(path = %self.log_path.display(), error = %e, "system log append failed");
        }
    }

    /// Append to an account's private history.
    pub async fn record_for(&self, account: AccountId, line: &str) {
        let path = self.history_path(account);
        if let Err(e) = append_line(&path, line).await {
            warn!(path = %path.display(), account, error = %e, "history append failed");
        }
    }
}
