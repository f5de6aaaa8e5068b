//! BCGN: a compact, streamable binary container for chess games.
//!
//! A BCGN file is a 32-byte file header followed by back-to-back game
//! entries. Each entry carries a fixed metadata prefix, length-prefixed
//! strings, optional key/value tags, an optional custom start position,
//! and the movetext. Multibyte fields are big-endian.
//!
//! Movetext comes in two compression levels:
//! - level 0: each move as a fixed 2-byte packing
//! - level 1: each move as a 1-byte position-relative move index, widening
//!   to 2 bytes only in positions where the index space overflows a byte
//!
//! The [`Writer`] and [`Reader`] are symmetric: a file written at either
//! level reads back to the same games, metadata, and positions.

mod error;
mod game;
mod header;
mod moveindex;
mod reader;
mod writer;

pub use error::BcgnError;
pub use game::{GameHeader, PositionReplay, UnparsedGame};
pub use header::{CompressionLevel, FileHeader};
pub use moveindex::{index_to_move, move_to_index, requires_long_move_index};
pub use reader::{GameIter, Reader};
pub use writer::Writer;
