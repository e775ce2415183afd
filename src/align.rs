use crate::{
    block::{MIN_BLOCK_SIZE, OVERHEAD},
    header::MAX_BLOCK_SIZE,
};

/// Every block size and every payload offset is a multiple of this value.
/// This is the double word, 8 bytes, regardless of the machine word size.
pub const ALIGNMENT: usize = 8;

/// Rounds `to_be_aligned` up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align(13), 16);
/// assert_eq!(align(16), 16);
/// assert_eq!(align(17), 24);
/// ```
#[inline]
pub fn align(to_be_aligned: usize) -> usize {
    (to_be_aligned + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Total block size needed to serve a request of `requested` payload bytes:
/// header and footer included, rounded up to [`ALIGNMENT`] and never less
/// than [`MIN_BLOCK_SIZE`]. Returns `None` when the block could never be
/// described by a boundary tag.
pub(crate) fn adjust(requested: usize) -> Option<usize> {
    if requested <= ALIGNMENT {
        return Some(MIN_BLOCK_SIZE);
    }

    let size = requested.checked_add(OVERHEAD + ALIGNMENT - 1)? & !(ALIGNMENT - 1);

    (size <= MAX_BLOCK_SIZE).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        let mut alignments = Vec::new();

        for i in 0..10 {
            // (1..8), (9..16), (17..24) and so on.
            let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));
            // Matching the sizes above: 8, 16, 24 and so on.
            let expected_alignment = ALIGNMENT * (i + 1);
            alignments.push((sizes, expected_alignment));
        }

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size));
            }
        }

        assert_eq!(align(0), 0);
    }

    #[test]
    fn adjusted_sizes() {
        // Anything that fits in one double word gets the minimum block.
        for requested in 0..=ALIGNMENT {
            assert_eq!(adjust(requested), Some(MIN_BLOCK_SIZE));
        }

        assert_eq!(adjust(9), Some(24));
        assert_eq!(adjust(16), Some(24));
        assert_eq!(adjust(17), Some(32));
        assert_eq!(adjust(100), Some(112));
        assert_eq!(adjust(4096), Some(4104));

        for requested in 1..1000 {
            let size = adjust(requested).unwrap();
            assert_eq!(size % ALIGNMENT, 0);
            assert!(size >= requested + OVERHEAD);
            assert!(size - OVERHEAD - requested < ALIGNMENT || size == MIN_BLOCK_SIZE);
        }
    }

    #[test]
    fn oversized_requests() {
        assert_eq!(adjust(usize::MAX), None);
        assert_eq!(adjust(MAX_BLOCK_SIZE), None);
        assert_eq!(adjust(MAX_BLOCK_SIZE - OVERHEAD), Some(MAX_BLOCK_SIZE));
    }
}
