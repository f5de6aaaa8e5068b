//! A position-indexed chess game database.
//!
//! Given a corpus of games in BCGN form, [`Database::import`] builds a
//! persistent on-disk index keyed by position fingerprint. A query takes a
//! set of positions and a set of (game level, result) targets and returns,
//! for every combination, the record ranges of games that contained the
//! position, with enough information to aggregate counts and fetch the
//! metadata of representative games.
//!
//! On disk the database is a tree of immutable sorted partition files
//! (`<level>/<result>/<bucket>/<id>` plus an `<id>_index` sidecar sampled
//! for interpolation search) and a global append-only header store that
//! assigns dense game ids.

mod database;
mod entry;
mod error;
mod headers;
mod pipeline;
pub mod store;

pub use database::{
    Database, ImportMode, ImportStats, ImportableFile, PositionQueryResult, QueryResults,
    QueryTarget, Range,
};
pub use entry::IndexEntry;
pub use error::DatabaseError;
pub use headers::{HeaderEntry, HeaderStore};
pub use pipeline::{StorePipeline, WriteCompletion};
