//! Size-class mapping: the pure functions that turn a byte size into a
//! `(first_level, second_level)` bucket coordinate.
use super::{
    ALIGN_SIZE, BLOCK_SIZE_MIN, FL_INDEX_COUNT, FL_INDEX_SHIFT, SL_INDEX_COUNT,
    SL_INDEX_COUNT_LOG2, SMALL_BLOCK_SIZE,
};

/// Find the bucket that stores free blocks of exactly `size` bytes.
///
/// Sizes below [`SMALL_BLOCK_SIZE`] land in row 0 with linear spacing of one
/// granule per bucket; everything else uses `floor(log2)` rows subdivided
/// into [`SL_INDEX_COUNT`] equal bands. Returns `None` when the size is too
/// large for the top row.
#[inline]
pub(super) fn map_floor(size: usize) -> Option<(usize, usize)> {
    debug_assert!(size >= BLOCK_SIZE_MIN);
    debug_assert!(size % ALIGN_SIZE == 0);

    if size < SMALL_BLOCK_SIZE {
        return Some((0, size / (SMALL_BLOCK_SIZE / SL_INDEX_COUNT)));
    }

    let f = usize::BITS - 1 - size.leading_zeros();
    let fl = (f - FL_INDEX_SHIFT + 1) as usize;
    if fl >= FL_INDEX_COUNT {
        return None;
    }
    let sl = (size >> (f - SL_INDEX_COUNT_LOG2)) & (SL_INDEX_COUNT - 1);
    Some((fl, sl))
}

/// Find the first bucket whose every member is at least `size` bytes: the
/// lookup used for allocation requests.
///
/// A bucket holds a *range* of sizes, so the exact mapping would under-serve
/// requests that fall inside a band. When `size` is not already on a bucket
/// boundary, add `2^(log2(size) - SL_INDEX_COUNT_LOG2) - 1` (one band minus
/// one byte) and re-derive the indices from the adjusted size; below
/// [`SMALL_BLOCK_SIZE`] every granule-aligned size *is* a bucket boundary.
/// Returns `None` when the adjustment overflows `usize` or escapes the top
/// row.
#[inline]
pub(super) fn map_ceil(size: usize) -> Option<(usize, usize)> {
    debug_assert!(size >= BLOCK_SIZE_MIN);
    debug_assert!(size % ALIGN_SIZE == 0);

    if size < SMALL_BLOCK_SIZE {
        return map_floor(size);
    }

    let f = usize::BITS - 1 - size.leading_zeros();
    let round = (1usize << (f - SL_INDEX_COUNT_LOG2)) - 1;
    if size & round == 0 {
        // Already an exact bucket boundary.
        return map_floor(size);
    }
    map_floor(size.checked_add(round)? & !round)
}
