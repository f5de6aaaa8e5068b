//! BCGN error type.

use thiserror::Error;

/// Errors produced by the BCGN reader and writer.
#[derive(Debug, Error)]
pub enum BcgnError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic, not a BCGN file")]
    BadMagic,

    #[error("unsupported BCGN version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported compression level {0}")]
    UnsupportedCompression(u8),

    #[error("unsupported auxiliary compression {0}")]
    UnsupportedAuxCompression(u8),

    #[error("string field of {0} bytes exceeds the 255-byte limit")]
    StringTooLong(usize),

    #[error("game entry exceeds 65535 bytes")]
    GameTooLong,

    #[error("ply count {0} exceeds the 14-bit field")]
    TooManyPlies(u32),

    #[error("game has no moves")]
    EmptyGame,

    #[error("truncated game entry")]
    Truncated,

    #[error("malformed game entry: {0}")]
    Malformed(&'static str),

    #[error("move index {0} has no corresponding move")]
    BadMoveIndex(u16),
}
