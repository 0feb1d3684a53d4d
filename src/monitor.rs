//! Fraud monitor.
//!
//! Consumes transaction events one at a time, writes each of them to the
//! system log and raises an alert when an account withdraws, or an account
//! pair transfers, too many times in a row.

use std::collections::HashMap;
use std::fmt;

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::event::TransactionEvent;
use crate::journal::Journal;
use crate::model::AccountId;

/// A threshold breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    RepeatedWithdrawals {
        account: AccountId,
        count: u32,
    },
    RepeatedTransfers {
        from: AccountId,
        to: AccountId,
        count: u32,
    },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RepeatedWithdrawals { account, count } => {
                write!(f, "ALERT: {count} consecutive withdrawals on account {account}")
            }
            Self::RepeatedTransfers { from, to, count } => {
                write!(f, "ALERT: {count} consecutive transfers from {from} to {to}")
            }
        }
    }
}

/// Streak counters and thresholds.
///
/// Counters reset to zero after an alert. A deposit resets the withdrawal
/// streak of its account; nothing resets a transfer streak but an alert.
#[derive(Debug)]
pub struct FraudDetector {
    withdrawal_threshold: u32,
    transfer_threshold: u32,
    withdrawals: HashMap<AccountId, u32>,
    transfers: HashMap<(AccountId, AccountId), u32>,
}

impl FraudDetector {
    pub fn new(withdrawal_threshold: u32, transfer_threshold: u32) -> Self {
        Self {
            withdrawal_threshold,
            transfer_threshold,
            withdrawals: HashMap::new(),
            transfers: HashMap::new(),
        }
    }

    /// Update the counters with one event.
    pub fn observe(&mut self, event: &TransactionEvent) -> Option<Alert> {
        match *event {
            TransactionEvent::Withdrawal { account, .. } => {
                let streak = self.withdrawals.entry(account).or_default();
                *streak += 1;
                if *streak >= self.withdrawal_threshold {
                    *streak = 0;
                    return Some(Alert::RepeatedWithdrawals {
                        account,
                        count: self.withdrawal_threshold,
                    });
                }
                None
            }
            TransactionEvent::Transfer { from, to, .. } => {
                let streak = self.transfers.entry((from, to)).or_default();
                *streak += 1;
                if *streak >= self.transfer_threshold {
                    *streak = 0;
                    return Some(Alert::RepeatedTransfers {
                        from,
                        to,
                        count: self.transfer_threshold,
                    });
                }
                None
            }
            TransactionEvent::Deposit { account, .. } => {
                self.withdrawals.remove(&account);
                None
            }
        }
    }

    pub fn withdrawal_streak(&self, account: AccountId) -> u32 {
        self.withdrawals.get(&account).copied().unwrap_or(0)
    }

    pub fn transfer_streak(&self, from: AccountId, to: AccountId) -> u32 {
        self.transfers.get(&(from, to)).copied().unwrap_or(0)
    }
}

/// Event consumer: durable logging plus fraud detection.
pub struct Monitor {
    detector: FraudDetector,
    journal: Journal,
}

impl Monitor {
    pub fn new(detector: FraudDetector, journal: Journal) -> Self {
        Self { detector, journal }
    }

    pub fn detector(&self) -> &FraudDetector {
        &self.detector
    }

    /// Consume events until the stream ends.
    pub async fn run(&mut self, mut events: impl Stream<Item = String> + Unpin) {
        info!("monitor waiting for transactions");
        while let Some(text) = events.next().await {
            self.handle(&text).await;
        }
        info!("event channel closed, monitor stopping");
    }

    /// Log one raw event and analyse it. Unrecognised text is only logged.
    pub async fn handle(&mut self, text: &str) -> Option<Alert> {
        info!(event = text, "transaction observed");
        self.journal.record(text).await;

        let event = match text.parse::<TransactionEvent>() {
            Ok(event) => event,
            Err(e) => {
                debug!(event = text, reason = %e, "event ignored");
                return None;
            }
        };

        let alert = self.detector.observe(&event)?;
        warn!(%alert, "suspicious activity");
        self.journal.record(&alert.to_string()).await;
        Some(alert)
    }
}
