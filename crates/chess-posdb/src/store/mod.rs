//! External store primitives: immutable record files, range-index
//! sidecars, and batched interpolation search over both.

mod range_index;
mod search;
mod span;

pub use range_index::{RangeIndex, RangeIndexBuilder, RangeIndexEntry, SAMPLE_INTERVAL};
pub use search::equal_range_multiple;
pub use span::{FixedRecord, ImmutableSpan};
