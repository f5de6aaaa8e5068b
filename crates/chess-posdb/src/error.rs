//! Database error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt database file {path}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },

    #[error("database root {0} does not exist")]
    NotFound(PathBuf),

    #[error("import memory budget of {0} bytes is too small")]
    MemoryBudgetTooSmall(usize),

    #[error("header string of {0} bytes exceeds the 255-byte limit")]
    StringTooLong(usize),

    #[error("header record for game {0} is corrupt")]
    CorruptHeader(u32),

    #[error("game id {0} is out of range")]
    GameIdOutOfRange(u32),

    #[error("background worker failed: {0}")]
    WorkerFailed(String),
}
