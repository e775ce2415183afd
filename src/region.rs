use crate::error::RegionError;

/// Largest region we can manage. Free list links are stored as 32 bit
/// offsets, see [`crate::list`].
pub const MAX_REGION_SIZE: usize = u32::MAX as usize;

/// Abstraction over the memory that backs the heap. The allocator only needs
/// one contiguous byte region that can grow at the end, like the program
/// break moved by `sbrk`. Regions never shrink, so memory is never returned
/// until the region itself is dropped.
///
/// Everything the allocator stores is addressed by offsets from the start of
/// the region, so implementations are free to place the bytes anywhere as
/// long as the ones granted so far are exposed by [`HeapRegion::bytes`].
pub trait HeapRegion {
    /// Extends the region by `increment` bytes and returns the offset where
    /// the new space starts (the old size).
    fn grow(&mut self, increment: usize) -> Result<usize, RegionError>;

    /// Number of bytes granted so far.
    fn size(&self) -> usize;

    /// All the bytes granted so far.
    fn bytes(&self) -> &[u8];

    /// Mutable view of all the bytes granted so far.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Offset of the first byte of the region.
    fn lo(&self) -> usize {
        0
    }

    /// Offset of the last byte of the region, `None` while it's empty.
    fn hi(&self) -> Option<usize> {
        self.size().checked_sub(1)
    }
}

/// Heap region backed by an owned buffer with a fixed maximum capacity. This
/// simulates the program break: growing moves the break forward until the
/// capacity is exhausted. The whole capacity is reserved up front, so the
/// bytes never move while the region is alive.
#[derive(Debug)]
pub struct MemRegion {
    heap: Vec<u8>,
    capacity: usize,
}

impl MemRegion {
    /// 20 MiB, enough for most workloads and small enough for tests.
    pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Builds a region that can grow up to `capacity` bytes (clamped to
    /// [`MAX_REGION_SIZE`]).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_REGION_SIZE);

        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum size of the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapRegion for MemRegion {
    fn grow(&mut self, increment: usize) -> Result<usize, RegionError> {
        let start = self.heap.len();
        let remaining = self.capacity - start;

        if increment > remaining {
            return Err(RegionError::Exhausted {
                requested: increment,
                remaining,
            });
        }

        // Stays within the reserved capacity, so this never reallocates.
        self.heap.resize(start + increment, 0);

        Ok(start)
    }

    fn size(&self) -> usize {
        self.heap.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.heap
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_like_a_program_break() {
        let mut region = MemRegion::with_capacity(64);
        assert_eq!(region.size(), 0);
        assert_eq!(region.hi(), None);

        assert_eq!(region.grow(16), Ok(0));
        assert_eq!(region.grow(32), Ok(16));
        assert_eq!(region.size(), 48);
        assert_eq!(region.lo(), 0);
        assert_eq!(region.hi(), Some(47));
        assert_eq!(region.bytes().len(), 48);

        // Growing by zero is allowed and returns the current break.
        assert_eq!(region.grow(0), Ok(48));
    }

    #[test]
    fn exhaustion_leaves_the_region_untouched() {
        let mut region = MemRegion::with_capacity(64);
        region.grow(48).unwrap();

        assert_eq!(
            region.grow(32),
            Err(RegionError::Exhausted {
                requested: 32,
                remaining: 16
            })
        );
        assert_eq!(region.size(), 48);

        assert_eq!(region.grow(16), Ok(48));
        assert!(region.grow(1).is_err());
    }

    #[test]
    fn bytes_do_not_move() {
        let mut region = MemRegion::with_capacity(1 << 16);
        region.grow(8).unwrap();
        let base = region.bytes().as_ptr();

        for _ in 0..100 {
            region.grow(256).unwrap();
        }

        assert_eq!(region.bytes().as_ptr(), base);
    }

    #[test]
    fn capacity_is_clamped() {
        let region = MemRegion::with_capacity(0);
        assert_eq!(region.capacity(), 0);
        assert!(MemRegion::new().capacity() <= MAX_REGION_SIZE);
    }
}
