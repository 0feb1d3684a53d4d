//! Runtime settings, read once at start-up from a `KEY=VALUE` file.
//!
//! ```text
//! # limits
//! WITHDRAWAL_LIMIT=1000
//! TRANSFER_LIMIT=2500.50
//! WITHDRAWAL_ALERT_THRESHOLD=3
//! SESSION_COUNT=8
//! ACCOUNTS_PATH=accounts.dat
//! ```
//!
//! Missing keys keep their defaults. Unknown keys are logged and ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::Amount;
use crate::drain;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("line {line}: expected KEY=VALUE, got '{text}'")]
    Syntax { line: usize, text: String },

    #[error("line {line}: invalid value '{value}' for {key}")]
    InvalidValue {
        line: usize,
        key: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Largest single withdrawal accepted from a client.
    pub withdrawal_limit: Amount,
    /// Largest single transfer accepted from a client.
    pub transfer_limit: Amount,
    /// Consecutive withdrawals on one account that raise an alert.
    pub withdrawal_alert_threshold: u32,
    /// Consecutive transfers between one ordered pair that raise an alert.
    pub transfer_alert_threshold: u32,
    /// Sessions admitted at the same time.
    pub session_count: usize,
    pub accounts_path: PathBuf,
    /// System log, written by the monitor.
    pub log_path: PathBuf,
    /// Root of the per-account transaction histories.
    pub history_dir: PathBuf,
    /// Drain loop idle interval.
    pub drain_interval: Duration,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            withdrawal_limit: Amount::from_units(5_000),
            transfer_limit: Amount::from_units(10_000),
            withdrawal_alert_threshold: 3,
            transfer_alert_threshold: 3,
            session_count: 4,
            accounts_path: PathBuf::from("accounts.dat"),
            log_path: PathBuf::from("bank.log"),
            history_dir: PathBuf::from("transactions"),
            drain_interval: drain::DEFAULT_INTERVAL,
            listen_addr: "127.0.0.1:7878".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let Some((key, value)) = entry.split_once('=') else {
                return Err(ConfigError::Syntax {
                    line,
                    text: entry.to_string(),
                });
            };
            let value = value.trim();

            match key.trim() {
                "WITHDRAWAL_LIMIT" => {
                    config.withdrawal_limit = parse_value(line, "WITHDRAWAL_LIMIT", value)?
                }
                "TRANSFER_LIMIT" => {
                    config.transfer_limit = parse_value(line, "TRANSFER_LIMIT", value)?
                }
                "WITHDRAWAL_ALERT_THRESHOLD" => {
                    config.withdrawal_alert_threshold =
                        parse_value(line, "WITHDRAWAL_ALERT_THRESHOLD", value)?
                }
                "TRANSFER_ALERT_THRESHOLD" => {
                    config.transfer_alert_threshold =
                        parse_value(line, "TRANSFER_ALERT_THRESHOLD", value)?
                }
                "SESSION_COUNT" => {
                    config.session_count = parse_value(line, "SESSION_COUNT", value)?
                }
                "ACCOUNTS_PATH" => config.accounts_path = PathBuf::from(value),
                "LOG_PATH" => config.log_path = PathBuf::from(value),
                "HISTORY_DIR" => config.history_dir = PathBuf::from(value),
                "DRAIN_INTERVAL_MS" => {
                    let ms: u64 = parse_value(line, "DRAIN_INTERVAL_MS", value)?;
                    config.drain_interval = Duration::from_millis(ms);
                }
                "LISTEN_ADDR" => config.listen_addr = value.to_string(),
                other => warn!(line, key = other, "unknown configuration key ignored"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.withdrawal_alert_threshold == 0 {
            return Err(ConfigError::Zero("WITHDRAWAL_ALERT_THRESHOLD"));
        }
        if self.transfer_alert_threshold == 0 {
            return Err(ConfigError::Zero("TRANSFER_ALERT_THRESHOLD"));
        }
        if self.session_count == 0 {
            return Err(ConfigError::Zero("SESSION_COUNT"));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(line: usize, key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        line,
        key,
        value: value.to_string(),
    })
}
