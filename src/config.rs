use crate::{
    align::align,
    block::MIN_BLOCK_SIZE,
    header::MAX_BLOCK_SIZE,
};

/// Tunables of [`crate::SegregatedAllocator`]. The number of size classes is
/// a const generic of the allocator itself, and the maximum heap size belongs
/// to the [`crate::HeapRegion`].
///
/// # Examples
///
/// ```rust
/// use segalloc::{Config, MemRegion, SegregatedAllocator};
///
/// let config = Config::new().chunk_size(1 << 16).tail_placement_limit(64);
/// let mut allocator = SegregatedAllocator::with_config(MemRegion::new(), config);
///
/// assert!(allocator.allocate(100).is_some());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Minimum number of bytes requested from the region whenever no free
    /// block can serve an allocation. Always aligned.
    pub(crate) chunk_size: usize,
    /// Blocks smaller than this (after adjusting for header, footer and
    /// alignment) are carved from the end of a free block instead of its
    /// start, so that small and large allocations don't interleave.
    pub(crate) tail_placement_limit: usize,
    /// Run the heap consistency checker after every mutating operation.
    /// Only honored in debug builds.
    pub(crate) verify: bool,
}

impl Config {
    /// 4 KiB chunks, tail placement below 96 bytes, no verification.
    pub const fn new() -> Self {
        Self {
            chunk_size: 1 << 12,
            tail_placement_limit: 96,
            verify: false,
        }
    }

    /// Sets the heap extension chunk. Rounded up to the alignment unit and
    /// kept between the minimum and maximum block sizes.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = align(bytes.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE));
        self
    }

    /// Sets the block size below which allocations are placed at the tail of
    /// free blocks. 0 always places at the head.
    pub fn tail_placement_limit(mut self, bytes: usize) -> Self {
        self.tail_placement_limit = bytes;
        self
    }

    /// Enables or disables the consistency checker in debug builds.
    pub fn verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.tail_placement_limit, 96);
        assert!(!config.verify);
    }

    #[test]
    fn chunk_size_is_sanitized() {
        assert_eq!(Config::new().chunk_size(0).chunk_size, MIN_BLOCK_SIZE);
        assert_eq!(Config::new().chunk_size(1000).chunk_size, 1000);
        assert_eq!(Config::new().chunk_size(1001).chunk_size, 1008);
        assert_eq!(Config::new().chunk_size(usize::MAX).chunk_size, MAX_BLOCK_SIZE);
    }
}
