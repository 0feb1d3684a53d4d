pub mod amount;
pub mod bank;
pub mod config;
pub mod csv;
pub mod drain;
pub mod event;
pub mod journal;
pub mod model;
pub mod monitor;
pub mod server;
pub mod session;
pub mod storage;
pub mod store;

pub use amount::Amount;
pub use bank::{Bank, BankError};
pub use config::Config;
pub use model::{Account, AccountId, Priority, Snapshot};
pub use session::{Session, SessionError, SessionFactory, SessionState};
pub use store::{Gate, Ledger, MutexGate};
