use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::model::{Account, AccountId};

/// Errors that can occur when reading or writing account csv
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open seed file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: invalid balance: {source}")]
    InvalidBalance {
        line: usize,
        source: crate::amount::AmountParseError,
    },

    #[error("failed to write row: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize, Serialize)]
struct AccountRow {
    id: AccountId,
    holder: String,
    balance: String,
    #[serde(default)]
    blocked: bool,
}

/// Accounts written by `init` when no seed file is given.
pub fn default_seed() -> Vec<Account> {
    vec![
        Account::new(1001, "John Doe", Amount::from_units(5000)),
        Account::new(1002, "Jane Smith", Amount::from_units(3000)),
        Account::new(1003, "Carlos Ruiz", Amount::from_units(7000)),
    ]
}

/// Read seed accounts from a csv file with an `id,holder,balance,blocked` header
pub fn read_seed(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Account, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<AccountRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let balance = row
                .balance
                .parse::<Amount>()
                .map_err(|source| CsvError::InvalidBalance { line, source })?;
            Ok(Account {
                id: row.id,
                holder: row.holder,
                balance,
                blocked: row.blocked,
            })
        }))
}

/// write accounts in csv format
pub fn write_accounts<'a, W: io::Write>(
    writer: W,
    accounts: impl IntoIterator<Item = &'a Account>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for account in accounts {
        writer.serialize(AccountRow {
            id: account.id,
            holder: account.holder.clone(),
            balance: account.balance.to_string(),
            blocked: account.blocked,
        })?;
    }

    writer.flush()?;
    Ok(())
}
