//! Map requested lengths to buckets and buckets back to buffer lengths.
//!
//! Size classes start at [MIN_LENGTH] elements and double with every bucket:
//!
//! ```text
//! index:   0   1   2    3    4    ...
//! length:  16  32  64   128  256  ...
//! ```
//!
//! Both directions are computed with shifts only, since [bucket_index] runs on every rent.

/// Log2 of the smallest canonical length.
const MIN_SHIFT: u32 = 4;

/// Length of the smallest size class.
pub const MIN_LENGTH: usize = 1 << MIN_SHIFT;

/// Returns the index of the smallest size class whose canonical length is at least `min_length`.
///
/// Every length in `1..=16` maps to bucket 0. Above that, the index is the number of significant
/// bits in `(min_length - 1) >> 4`, which equals `ceil(log2(min_length / 16))`.
///
/// `min_length` of 0 is handled by the caller (zero-length requests never reach a bucket) and
/// maps to bucket 0.
#[inline]
pub const fn bucket_index(min_length: usize) -> usize {
    let scaled = min_length.saturating_sub(1) >> MIN_SHIFT;
    (usize::BITS - scaled.leading_zeros()) as usize
}

/// Returns the canonical length of every buffer stored in bucket `index`.
///
/// # Panics
///
/// Panics (via overflow checks) if `index` is large enough to shift out of `usize`.
#[inline]
pub const fn canonical_length(index: usize) -> usize {
    MIN_LENGTH << index
}
