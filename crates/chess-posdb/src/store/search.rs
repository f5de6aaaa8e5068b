//! Batched equal-range search over a sorted partition file.

use crate::store::{ImmutableSpan, RangeIndex};
use crate::IndexEntry;
use chess_board::PositionSignature;

/// For each key of the ascending `sorted_keys`, returns the half-open
/// record range of the file where every entry equals that key.
///
/// One left-to-right sweep: each key is first narrowed through the range
/// index, then located by interpolation search on the numeric projection
/// of the signatures. A running floor keeps later keys from re-searching
/// records already passed, so the whole batch costs one monotone pass
/// over the index plus O(log log) probes per key on evenly spread data.
pub fn equal_range_multiple(
    span: &ImmutableSpan<IndexEntry>,
    index: &RangeIndex,
    sorted_keys: &[PositionSignature],
) -> Vec<(u64, u64)> {
    debug_assert!(sorted_keys.windows(2).all(|w| w[0] <= w[1]));

    let mut results = Vec::with_capacity(sorted_keys.len());
    let mut floor = 0u64;

    for &key in sorted_keys {
        let (begin, end) = index.window(key, span.len());
        let begin = begin.max(floor);
        let end = end.max(begin);

        let lower = search_boundary(span, begin, end, key, Bound::Lower);
        let upper = search_boundary(span, lower, end, key, Bound::Upper);

        // Equal input keys must re-find the same range, so the floor is
        // the range start, not its end.
        floor = lower;
        results.push((lower, upper));
    }

    results
}

#[derive(Clone, Copy)]
enum Bound {
    /// First record with signature >= key.
    Lower,
    /// First record with signature > key.
    Upper,
}

fn search_boundary(
    span: &ImmutableSpan<IndexEntry>,
    mut lo: u64,
    mut hi: u64,
    key: PositionSignature,
    bound: Bound,
) -> u64 {
    let target = key.to_u128();
    let mut step = 0u32;

    while lo < hi {
        let mid = probe(span, lo, hi, target, step);
        let sig = span.get(mid).signature();
        let below = match bound {
            Bound::Lower => sig < key,
            Bound::Upper => sig <= key,
        };
        if below {
            lo = mid + 1;
        } else {
            hi = mid;
        }
        step += 1;
    }

    lo
}

/// Picks the next probe index in `[lo, hi)`.
///
/// Even steps interpolate on the u128 projection; odd steps bisect, which
/// bounds the worst case to O(log) on adversarially skewed key
/// distributions.
fn probe(span: &ImmutableSpan<IndexEntry>, lo: u64, hi: u64, target: u128, step: u32) -> u64 {
    let width = hi - lo;
    if step % 2 == 1 || width < 8 {
        return lo + width / 2;
    }

    let lo_val = span.get(lo).signature().to_u128();
    let hi_val = span.get(hi - 1).signature().to_u128();
    if hi_val <= lo_val {
        return lo + width / 2;
    }

    let clamped = target.clamp(lo_val, hi_val);
    let fraction = (clamped - lo_val) as f64 / (hi_val - lo_val) as f64;
    let offset = ((width - 1) as f64 * fraction) as u64;
    lo + offset.min(width - 1)
}
