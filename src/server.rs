//! Line-oriented TCP front end.
//!
//! The server greets each connection with `READY` and then answers one line
//! per command:
//!
//! ```text
//! login 1001              -> OK
//! deposit 200             -> OK 5200.00
//! withdraw 50.5           -> OK 5149.50
//! transfer 1002 100       -> OK 5049.50
//! balance                 -> OK 5049.50
//! withdraw 99999          -> ERR withdrawal limit is 5000.00
//! quit                    -> BYE
//! ```
//!
//! Withdrawal and transfer ceilings are enforced here, before the session
//! engine sees the request.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Amount;
use crate::amount::AmountParseError;
use crate::config::Config;
use crate::model::AccountId;
use crate::session::{Session, SessionFactory};
use crate::store::Gate;

/// One client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Login(AccountId),
    Deposit(Amount),
    Withdraw(Amount),
    Transfer(AccountId, Amount),
    Balance,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("{0}: missing argument")]
    MissingArgument(&'static str),
    #[error("invalid account '{0}'")]
    InvalidAccount(String),
    #[error(transparent)]
    InvalidAmount(#[from] AmountParseError),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };

        match verb.to_ascii_lowercase().as_str() {
            "login" => Ok(Command::Login(account_arg("login", words.next())?)),
            "deposit" => Ok(Command::Deposit(amount_arg("deposit", words.next())?)),
            "withdraw" => Ok(Command::Withdraw(amount_arg("withdraw", words.next())?)),
            "transfer" => {
                let to = account_arg("transfer", words.next())?;
                let amount = amount_arg("transfer", words.next())?;
                Ok(Command::Transfer(to, amount))
            }
            "balance" => Ok(Command::Balance),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(verb.to_string())),
        }
    }
}

fn account_arg(verb: &'static str, word: Option<&str>) -> Result<AccountId, CommandError> {
    let word = word.ok_or(CommandError::MissingArgument(verb))?;
    word.parse()
        .map_err(|_| CommandError::InvalidAccount(word.to_string()))
}

fn amount_arg(verb: &'static str, word: Option<&str>) -> Result<Amount, CommandError> {
    let word = word.ok_or(CommandError::MissingArgument(verb))?;
    Ok(word.parse()?)
}

/// Per-operation ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub withdrawal: Amount,
    pub transfer: Amount,
}

impl From<&Config> for Limits {
    fn from(config: &Config) -> Self {
        Self {
            withdrawal: config.withdrawal_limit,
            transfer: config.transfer_limit,
        }
    }
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Balance(Amount),
    Err(String),
    Bye,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Balance(amount) => write!(f, "OK {amount}"),
            Reply::Err(reason) => write!(f, "ERR {reason}"),
            Reply::Bye => write!(f, "BYE"),
        }
    }
}

impl Reply {
    fn error(reason: impl fmt::Display) -> Self {
        Reply::Err(reason.to_string())
    }
}

/// Run one command against the session.
pub async fn execute<G: Gate>(session: &mut Session<G>, limits: Limits, command: Command) -> Reply {
    let result = match command {
        Command::Login(id) => {
            return match session.authenticate(id) {
                Ok(()) => Reply::Ok,
                Err(e) => Reply::error(e),
            };
        }
        Command::Quit => return Reply::Bye,
        Command::Balance => session.balance(),
        Command::Deposit(amount) => session.deposit(amount).await,
        Command::Withdraw(amount) => {
            if amount > limits.withdrawal {
                return Reply::Err(format!("withdrawal limit is {}", limits.withdrawal));
            }
            session.withdraw(amount).await
        }
        Command::Transfer(to, amount) => {
            if amount > limits.transfer {
                return Reply::Err(format!("transfer limit is {}", limits.transfer));
            }
            session.transfer(to, amount).await
        }
    };

    match result {
        Ok(balance) => Reply::Balance(balance),
        Err(e) => Reply::error(e),
    }
}

/// Longest request line accepted, in bytes, not counting the newline.
pub const MAX_LINE_LEN: usize = 256;

enum Incoming {
    Line,
    TooLong,
}

/// Read one newline-terminated request into `buf`, keeping at most
/// `MAX_LINE_LEN` bytes. The rest of an over-long line is consumed and
/// discarded. Returns `None` at end of input.
async fn read_request<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<Incoming>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut too_long = false;
    let mut seen = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (seen, too_long) {
                (false, _) => None,
                (true, true) => Some(Incoming::TooLong),
                (true, false) => Some(Incoming::Line),
            });
        }
        seen = true;

        let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (&available[..i], true),
            None => (available, false),
        };
        if !too_long {
            if buf.len() + chunk.len() > MAX_LINE_LEN {
                too_long = true;
                buf.clear();
            } else {
                buf.extend_from_slice(chunk);
            }
        }
        let used = chunk.len() + usize::from(done);
        reader.consume(used);

        if done {
            return Ok(Some(if too_long { Incoming::TooLong } else { Incoming::Line }));
        }
    }
}

/// Drive a session from a line stream until `quit` or end of input.
///
/// Undecodable and over-long lines are answered with `ERR` and the session
/// keeps going.
pub async fn serve_connection<G, R, W>(
    mut session: Session<G>,
    limits: Limits,
    mut reader: R,
    mut writer: W,
) -> io::Result<()>
where
    G: Gate,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(b"READY\n").await?;
    let mut buf = Vec::with_capacity(MAX_LINE_LEN);

    while let Some(incoming) = read_request(&mut reader, &mut buf).await? {
        let reply = match incoming {
            Incoming::TooLong => Reply::Err(format!("line longer than {MAX_LINE_LEN} bytes")),
            Incoming::Line => match std::str::from_utf8(&buf) {
                Err(_) => Reply::error("invalid input"),
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let reply = match line.parse::<Command>() {
                        Ok(command) => execute(&mut session, limits, command).await,
                        Err(e) => Reply::error(e),
                    };
                    debug!(request = line, reply = %reply, "command handled");
                    reply
                }
            },
        };

        writer.write_all(format!("{reply}\n").as_bytes()).await?;
        if reply == Reply::Bye {
            break;
        }
    }

    session.close();
    writer.flush().await
}

/// Accept loop admitting at most `max_sessions` clients at once.
pub struct Server<G: Gate> {
    listener: TcpListener,
    sessions: SessionFactory<G>,
    limits: Limits,
    slots: Arc<Semaphore>,
}

impl<G: Gate> Server<G> {
    pub async fn bind(
        addr: &str,
        sessions: SessionFactory<G>,
        limits: Limits,
        max_sessions: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            sessions,
            limits,
            slots: Arc::new(Semaphore::new(max_sessions)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `cancel` fires, then abort every live session.
    pub async fn run(self, cancel: CancellationToken) {
        info!(addr = ?self.listener.local_addr().ok(), "accepting connections");
        let mut tasks = JoinSet::new();

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "session task failed");
                    }
                    continue;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!(%peer, "session limit reached, connection refused");
                reject(stream).await;
                continue;
            };

            info!(%peer, "connection accepted");
            let session = self.sessions.open();
            let limits = self.limits;
            tasks.spawn(async move {
                let _permit = permit;
                let (reader, writer) = stream.into_split();
                if let Err(e) = serve_connection(session, limits, BufReader::new(reader), writer).await {
                    debug!(%peer, error = %e, "connection error");
                }
                info!(%peer, "connection closed");
            });
        }

        info!(live = tasks.len(), "server stopping");
        tasks.shutdown().await;
    }
}

async fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(b"ERR too many sessions\n").await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, EventReceiver};
    use crate::journal::Journal;
    use crate::model::Account;
    use crate::store::{AccountStore, Ledger, MutexGate};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, duplex};

    fn factory() -> (TempDir, SessionFactory<MutexGate>, EventReceiver) {
        let accounts = AccountStore::from_accounts(vec![
            Account::new(1001, "John Doe", Amount::from_units(5000)),
            Account::new(1002, "Jane Smith", Amount::from_units(3000)),
        ])
        .unwrap();
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path().join("bank.log"), dir.path().join("history"));
        let (events, rx) = event::channel();
        let gate = Arc::new(MutexGate::new(Ledger::new(accounts)));
        (dir, SessionFactory::new(gate, journal, events), rx)
    }

    fn limits() -> Limits {
        Limits {
            withdrawal: Amount::from_units(1000),
            transfer: Amount::from_units(2000),
        }
    }

    async fn converse(sessions: &SessionFactory<MutexGate>, input: &str) -> Vec<String> {
        converse_bytes(sessions, input.as_bytes()).await
    }

    async fn converse_bytes(sessions: &SessionFactory<MutexGate>, input: &[u8]) -> Vec<String> {
        let (client, server) = duplex(8192);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = tokio::spawn(serve_connection(
            sessions.open(),
            limits(),
            BufReader::new(server_read),
            server_write,
        ));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(input).await.unwrap();
        client_write.shutdown().await.unwrap();

        handle.await.unwrap().unwrap();
        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        output.lines().map(str::to_string).collect()
    }

    #[test]
    fn parse_commands() {
        assert_eq!("login 1001".parse(), Ok(Command::Login(1001)));
        assert_eq!(
            "DEPOSIT 12.5".parse(),
            Ok(Command::Deposit(Amount::from_scaled(1250)))
        );
        assert_eq!(
            " transfer 1002 300 ".parse(),
            Ok(Command::Transfer(1002, Amount::from_units(300)))
        );
        assert_eq!("balance".parse(), Ok(Command::Balance));
        assert_eq!("exit".parse(), Ok(Command::Quit));
    }

    #[test]
    fn parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "fly 1".parse::<Command>(),
            Err(CommandError::Unknown("fly".into()))
        );
        assert_eq!(
            "transfer 1002".parse::<Command>(),
            Err(CommandError::MissingArgument("transfer"))
        );
        assert_eq!(
            "login bob".parse::<Command>(),
            Err(CommandError::InvalidAccount("bob".into()))
        );
        assert!(matches!(
            "withdraw 1.999".parse::<Command>(),
            Err(CommandError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn full_conversation() {
        let (_dir, sessions, mut rx) = factory();
        let replies = converse(
            &sessions,
            "balance\nlogin 1001\nwithdraw 200\ntransfer 1002 300\nbalance\nquit\nbalance\n",
        )
        .await;

        assert_eq!(
            replies,
            vec![
                "READY",
                "ERR not logged in",
                "OK",
                "OK 4800.00",
                "OK 4500.00",
                "OK 4500.00",
                "BYE",
            ]
        );
        assert_eq!(rx.recv().await.unwrap(), "RETIRO 1001 200.00");
        assert_eq!(rx.recv().await.unwrap(), "TRANSFERENCIA 1001 1002 300.00");
    }

    #[tokio::test]
    async fn limits_are_enforced_before_the_session() {
        let (_dir, sessions, mut rx) = factory();
        let replies = converse(
            &sessions,
            "login 1001\nwithdraw 1000.01\ntransfer 1002 2500\nwithdraw 1000\n",
        )
        .await;

        assert_eq!(
            replies,
            vec![
                "READY",
                "OK",
                "ERR withdrawal limit is 1000.00",
                "ERR transfer limit is 2000.00",
                "OK 4000.00",
            ]
        );
        // only the accepted withdrawal produced an event
        assert_eq!(rx.recv().await.unwrap(), "RETIRO 1001 1000.00");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn errors_are_reported_and_session_continues() {
        let (_dir, sessions, _rx) = factory();
        let replies = converse(
            &sessions,
            "login 9\nlogin 1002\nwithdraw 900\nwithdraw 900\nwithdraw 900\nwithdraw 900\nhello\n",
        )
        .await;

        assert_eq!(replies[1], "ERR account 9 does not exist");
        assert_eq!(replies[2], "OK");
        assert_eq!(replies[5], "OK 300.00");
        assert_eq!(
            replies[6],
            "ERR insufficient funds: balance 300.00, requested 900.00"
        );
        assert_eq!(replies[7], "ERR unknown command 'hello'");
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected_and_session_continues() {
        let (_dir, sessions, _rx) = factory();
        let replies = converse_bytes(&sessions, b"login \xe9\nlogin 1001\nbalance\n").await;

        assert_eq!(replies, vec!["READY", "ERR invalid input", "OK", "OK 5000.00"]);
    }

    #[tokio::test]
    async fn overlong_line_is_rejected_and_session_continues() {
        let (_dir, sessions, _rx) = factory();
        let mut input = format!("login {}", "1".repeat(MAX_LINE_LEN)).into_bytes();
        input.extend_from_slice(b"\nlogin 1001\nbalance\n");
        let replies = converse_bytes(&sessions, &input).await;

        assert_eq!(
            replies,
            vec![
                "READY",
                "ERR line longer than 256 bytes",
                "OK",
                "OK 5000.00",
            ]
        );
    }

    #[tokio::test]
    async fn line_at_the_cap_is_accepted() {
        let (_dir, sessions, _rx) = factory();
        let line = format!("{:<width$}", "login 1002", width = MAX_LINE_LEN);
        let replies = converse(&sessions, &format!("{line}\nbalance")).await;

        assert_eq!(replies, vec!["READY", "OK", "OK 3000.00"]);
    }

    #[tokio::test]
    async fn tcp_admission_is_bounded() {
        let (_dir, sessions, _rx) = factory();
        let server = Server::bind("127.0.0.1:0", sessions, limits(), 1).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(server.run(cancel.clone()));

        let first = TcpStream::connect(addr).await.unwrap();
        let mut first = BufReader::new(first);
        let mut line = String::new();
        first.read_line(&mut line).await.unwrap();
        assert_eq!(line, "READY\n");

        let mut second = BufReader::new(TcpStream::connect(addr).await.unwrap());
        line.clear();
        second.read_line(&mut line).await.unwrap();
        assert_eq!(line, "ERR too many sessions\n");

        cancel.cancel();
        handle.await.unwrap();
    }
}
