//! Fixed-size binary account records.
//!
//! Record layout (64 bytes, little endian):
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | account id (`u32`)                     |
//! | 4      | 48   | holder name, UTF-8, NUL padded         |
//! | 52     | 8    | balance in hundredths (`i64`)          |
//! | 60     | 4    | blocked flag (`u32`, non-zero blocked) |
//!
//! Record `i` starts at byte `i * RECORD_LEN`, matching the account's
//! position in the [`AccountStore`](crate::store::AccountStore).

use std::fs;
use std::io::{self, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::Amount;
use crate::model::Account;
use crate::store::MAX_ACCOUNTS;

pub const RECORD_LEN: usize = 64;
const HOLDER_LEN: usize = 48;

const ID_AT: usize = 0;
const HOLDER_AT: usize = 4;
const BALANCE_AT: usize = HOLDER_AT + HOLDER_LEN;
const BLOCKED_AT: usize = BALANCE_AT + 8;

/// Errors from reading or writing the account file.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{path}: length {len} is not a multiple of {RECORD_LEN}")]
    Truncated { path: PathBuf, len: usize },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn encode_record(account: &Account) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[ID_AT..HOLDER_AT].copy_from_slice(&account.id.to_le_bytes());

    let holder = truncate_utf8(&account.holder, HOLDER_LEN);
    buf[HOLDER_AT..HOLDER_AT + holder.len()].copy_from_slice(holder.as_bytes());

    buf[BALANCE_AT..BLOCKED_AT].copy_from_slice(&account.balance.to_scaled().to_le_bytes());
    buf[BLOCKED_AT..].copy_from_slice(&u32::from(account.blocked).to_le_bytes());
    buf
}

pub fn decode_record(buf: &[u8; RECORD_LEN]) -> Account {
    let id = u32::from_le_bytes(le_array(&buf[ID_AT..HOLDER_AT]));

    let holder = &buf[HOLDER_AT..BALANCE_AT];
    let end = holder.iter().position(|b| *b == 0).unwrap_or(HOLDER_LEN);
    let holder = String::from_utf8_lossy(&holder[..end]).into_owned();

    let balance = i64::from_le_bytes(le_array(&buf[BALANCE_AT..BLOCKED_AT]));
    let blocked = u32::from_le_bytes(le_array(&buf[BLOCKED_AT..])) != 0;

    Account {
        id,
        holder,
        balance: Amount::from_scaled(balance),
        blocked,
    }
}

/// Read every record of the account file, up to the store capacity.
pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<Account>, StorageError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    if bytes.len() % RECORD_LEN != 0 {
        return Err(StorageError::Truncated {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }

    let records = bytes.len() / RECORD_LEN;
    if records > MAX_ACCOUNTS {
        warn!(
            path = %path.display(),
            records,
            "account file holds more records than the store capacity, ignoring the rest"
        );
    }

    Ok(bytes
        .chunks_exact(RECORD_LEN)
        .take(MAX_ACCOUNTS)
        .map(|chunk| decode_record(&le_array(chunk)))
        .collect())
}

/// Rewrite the whole account file.
///
/// Writes to a sibling temporary file first, then renames it over `path`.
pub fn save_all<'a>(
    path: impl AsRef<Path>,
    accounts: impl IntoIterator<Item = &'a Account>,
) -> Result<(), StorageError> {
    let path = path.as_ref();
    let tmp = tmp_path(path);

    let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
    for account in accounts {
        file.write_all(&encode_record(account))
            .map_err(|e| StorageError::io(&tmp, e))?;
    }
    file.sync_all().map_err(|e| StorageError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}

/// Overwrite record `index` of an existing account file with `account`.
pub async fn write_record(
    path: impl AsRef<Path>,
    index: usize,
    account: &Account,
) -> Result<(), StorageError> {
    let path = path.as_ref();
    let record = encode_record(account);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    file.seek(SeekFrom::Start((index * RECORD_LEN) as u64))
        .await
        .map_err(|e| StorageError::io(path, e))?;
    file.write_all(&record)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    file.flush().await.map_err(|e| StorageError::io(path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
