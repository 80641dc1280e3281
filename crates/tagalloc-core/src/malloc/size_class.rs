//! Power-of-two size classes for the segregated free list.
//!
//! Class `k` holds free blocks whose size falls in `[2^k, 2^(k+1))`. The last
//! class absorbs every larger size. Classes below `log2(MIN_BLOCK_SIZE)` are
//! never populated but keep the index arithmetic a plain `log2`.

/// Number of size-class buckets.
pub const NUM_SIZE_CLASSES: usize = 24;

/// Returns the bucket holding blocks of `size` bytes.
///
/// Total over all sizes: `0` and `1` map to class 0, sizes at or above
/// `2^(NUM_SIZE_CLASSES - 1)` map to the last class.
#[must_use]
pub fn bucket_for(size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let log2 = (usize::BITS - 1 - size.leading_zeros()) as usize;
    log2.min(NUM_SIZE_CLASSES - 1)
}

/// Inclusive lower bound and exclusive upper bound of a class.
///
/// The upper bound is `None` for the catch-all last class. Returns `None` for
/// out-of-range indices.
#[must_use]
pub fn class_range(index: usize) -> Option<(usize, Option<usize>)> {
    if index >= NUM_SIZE_CLASSES {
        return None;
    }
    let lower = 1usize << index;
    let upper = (index + 1 < NUM_SIZE_CLASSES).then(|| 1usize << (index + 1));
    Some((lower, upper))
}
