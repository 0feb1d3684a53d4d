//! Transaction events sent from sessions to the fraud monitor.
//!
//! Events travel as short text lines (`RETIRO 1001 200.00`), so any producer
//! able to write a line can feed the monitor. Delivery is fire-and-forget:
//! the queue is bounded, and an event that finds it full is logged and
//! dropped instead of stalling the session that produced it.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::Amount;
use crate::amount::AmountParseError;
use crate::model::AccountId;

/// Longest event text delivered, in bytes. Longer text is cut.
pub const MAX_EVENT_LEN: usize = 127;

/// Events held for the monitor before new ones are dropped.
pub const EVENT_QUEUE_LEN: usize = 1024;

const DEPOSIT: &str = "DEPOSITO";
const WITHDRAWAL: &str = "RETIRO";
const TRANSFER: &str = "TRANSFERENCIA";

/// A completed operation, as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    Deposit {
        account: AccountId,
        amount: Amount,
    },
    Withdrawal {
        account: AccountId,
        amount: Amount,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
}

/// Why a line is not a recognised event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventParseError {
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),
    #[error("{0}: missing field")]
    MissingField(&'static str),
    #[error("{0}: invalid account '{1}'")]
    InvalidAccount(&'static str, String),
    #[error("{0}: {1}")]
    InvalidAmount(&'static str, AmountParseError),
}

impl fmt::Display for TransactionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit { account, amount } => write!(f, "{DEPOSIT} {account} {amount}"),
            Self::Withdrawal { account, amount } => write!(f, "{WITHDRAWAL} {account} {amount}"),
            Self::Transfer { from, to, amount } => write!(f, "{TRANSFER} {from} {to} {amount}"),
        }
    }
}

impl FromStr for TransactionEvent {
    type Err = EventParseError;

    /// Trailing fields after the expected ones are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let kind = fields.next().unwrap_or_default();

        match kind {
            DEPOSIT => Ok(Self::Deposit {
                account: account_field(DEPOSIT, fields.next())?,
                amount: amount_field(DEPOSIT, fields.next())?,
            }),
            WITHDRAWAL => Ok(Self::Withdrawal {
                account: account_field(WITHDRAWAL, fields.next())?,
                amount: amount_field(WITHDRAWAL, fields.next())?,
            }),
            TRANSFER => Ok(Self::Transfer {
                from: account_field(TRANSFER, fields.next())?,
                to: account_field(TRANSFER, fields.next())?,
                amount: amount_field(TRANSFER, fields.next())?,
            }),
            other => Err(EventParseError::UnknownKind(other.to_string())),
        }
    }
}

fn account_field(kind: &'static str, field: Option<&str>) -> Result<AccountId, EventParseError> {
    let field = field.ok_or(EventParseError::MissingField(kind))?;
    field
        .parse()
        .map_err(|_| EventParseError::InvalidAccount(kind, field.to_string()))
}

fn amount_field(kind: &'static str, field: Option<&str>) -> Result<Amount, EventParseError> {
    let field = field.ok_or(EventParseError::MissingField(kind))?;
    field
        .parse()
        .map_err(|e| EventParseError::InvalidAmount(kind, e))
}

/// Producer half of the event channel. Cheap to clone, one per session.
#[derive(Debug, Clone)]
pub struct EventSender {
    inner: mpsc::Sender<String>,
}

/// Consumer half, handed to the monitor.
pub type EventReceiver = mpsc::Receiver<String>;

/// Create a multi-producer, single-consumer event channel holding up to
/// [`EVENT_QUEUE_LEN`] events.
pub fn channel() -> (EventSender, EventReceiver) {
    with_capacity(EVENT_QUEUE_LEN)
}

pub fn with_capacity(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { inner: tx }, rx)
}

impl EventSender {
    pub fn send(&self, event: &TransactionEvent) {
        self.send_text(event.to_string());
    }

    /// Deliver a raw line. Never blocks. A full queue or a closed channel is
    /// logged and the event is lost.
    pub fn send_text(&self, mut text: String) {
        if text.len() > MAX_EVENT_LEN {
            let mut end = MAX_EVENT_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        match self.inner.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(text)) => {
                warn!(event = %text, "monitor falling behind, event dropped");
            }
            Err(TrySendError::Closed(text)) => {
                warn!(event = %text, "monitor unavailable, event not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_wire_keywords() {
        let withdrawal = TransactionEvent::Withdrawal {
            account: 1001,
            amount: Amount::from_units(200),
        };
        let transfer = TransactionEvent::Transfer {
            from: 1001,
            to: 1002,
            amount: Amount::from_units(300),
        };
        let deposit = TransactionEvent::Deposit {
            account: 1002,
            amount: Amount::from_scaled(1050),
        };

        assert_eq!(withdrawal.to_string(), "RETIRO 1001 200.00");
        assert_eq!(transfer.to_string(), "TRANSFERENCIA 1001 1002 300.00");
        assert_eq!(deposit.to_string(), "DEPOSITO 1002 10.50");
    }

    #[test]
    fn parse_known_shapes() {
        assert_eq!(
            "RETIRO 1001 200.00".parse(),
            Ok(TransactionEvent::Withdrawal {
                account: 1001,
                amount: Amount::from_units(200)
            })
        );
        assert_eq!(
            "TRANSFERENCIA 1001 1002 300".parse(),
            Ok(TransactionEvent::Transfer {
                from: 1001,
                to: 1002,
                amount: Amount::from_units(300)
            })
        );
        assert_eq!(
            "  DEPOSITO   7 1.5 trailing".parse(),
            Ok(TransactionEvent::Deposit {
                account: 7,
                amount: Amount::from_scaled(150)
            })
        );
    }

    #[test]
    fn parse_rejects_other_shapes() {
        assert!(matches!(
            "HELLO 1 2".parse::<TransactionEvent>(),
            Err(EventParseError::UnknownKind(_))
        ));
        assert!(matches!(
            "".parse::<TransactionEvent>(),
            Err(EventParseError::UnknownKind(_))
        ));
        assert_eq!(
            "RETIRO 1001".parse::<TransactionEvent>(),
            Err(EventParseError::MissingField("RETIRO"))
        );
        assert!(matches!(
            "TRANSFERENCIA x 2 3".parse::<TransactionEvent>(),
            Err(EventParseError::InvalidAccount("TRANSFERENCIA", _))
        ));
        assert!(matches!(
            "DEPOSITO 1 lots".parse::<TransactionEvent>(),
            Err(EventParseError::InvalidAmount("DEPOSITO", _))
        ));
    }

    #[tokio::test]
    async fn sender_delivers_in_order() {
        let (tx, mut rx) = channel();
        let other = tx.clone();
        tx.send_text("one".into());
        other.send_text("two".into());

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn long_text_is_cut() {
        let (tx, mut rx) = channel();
        tx.send_text("x".repeat(500));
        assert_eq!(rx.recv().await.unwrap().len(), MAX_EVENT_LEN);
    }

    #[test]
    fn full_queue_drops_newest_event() {
        let (tx, mut rx) = with_capacity(2);
        tx.send_text("one".into());
        tx.send_text("two".into());
        tx.send_text("three".into());

        assert_eq!(rx.try_recv().as_deref(), Ok("one"));
        assert_eq!(rx.try_recv().as_deref(), Ok("two"));
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));

        // room again once the monitor catches up
        tx.send_text("four".into());
        assert_eq!(rx.try_recv().as_deref(), Ok("four"));
    }

    #[test]
    fn send_to_closed_channel_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(&TransactionEvent::Deposit {
            account: 1,
            amount: Amount::from_units(1),
        });
    }
}
