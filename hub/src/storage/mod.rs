// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod db;
mod sql;

use thiserror::Error;

pub use db::Storage;

/// Largest source sequence the packet table can hold (SQLite INTEGER is signed 64-bit).
pub const MAX_SRC_SEQ: u64 = i64::MAX as u64;

#[derive(Debug, Error)]
pub enum StorageOpenError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] rusqlite_migration::Error),
}

/// Result of one registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Registered { hub_seq: u64 },
    // Nothing was written and no sequence number was consumed.
    Duplicate { existing_hub_seq: u64 },
}
