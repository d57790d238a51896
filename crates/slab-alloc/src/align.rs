//! Alignment arithmetic.
//!
//! Unlike the usual mask tricks these helpers accept any non-zero
//! alignment, since offset spaces are often aligned to record strides such
//! as a 12-byte vertex.

/// Rounds `value` up to the next multiple of `alignment`.
///
/// Returns `None` if the result does not fit in `usize`.
///
/// # Panics
///
/// Panics if `alignment` is zero.
///
/// ```
/// use slab_alloc::align::align_up;
///
/// assert_eq!(align_up(13, 8), Some(16));
/// assert_eq!(align_up(24, 12), Some(24));
/// assert_eq!(align_up(usize::MAX, 2), None);
/// ```
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> Option<usize> {
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

/// Rounds `value` down to a multiple of `alignment`.
///
/// # Panics
///
/// Panics if `alignment` is zero.
#[must_use]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    value - value % alignment
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::WORD_SIZE;

    #[test]
    fn test_align_up_word_size() {
        let alignments = [(1..9, 8), (9..17, 16), (17..25, 24), (25..33, 32)];
        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(align_up(size, WORD_SIZE), Some(expected));
            }
        }
        assert_eq!(align_up(0, WORD_SIZE), Some(0));
    }

    #[test]
    fn test_align_up_odd_stride() {
        assert_eq!(align_up(1, 12), Some(12));
        assert_eq!(align_up(12, 12), Some(12));
        assert_eq!(align_up(25, 12), Some(36));
        assert_eq!(align_up(7, 3), Some(9));
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, 8), 0);
        assert_eq!(align_down(15, 8), 8);
        assert_eq!(align_down(16, 8), 16);
        assert_eq!(align_down(35, 12), 24);
        assert_eq!(align_down(900, 12), 900);
    }

    #[test]
    fn test_align_up_overflow() {
        assert_eq!(align_up(usize::MAX - 3, 8), None);
        assert_eq!(align_up(usize::MAX, 1), Some(usize::MAX));
    }

    #[test]
    #[should_panic(expected = "remainder with a divisor of zero")]
    fn test_align_zero_alignment() {
        let _ = align_down(10, 0);
    }
}
