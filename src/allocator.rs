use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
    align::{adjust, align},
    block::{write_word, BlockPtr, DSIZE, MIN_BLOCK_SIZE, OVERHEAD, WSIZE},
    bucket::Buckets,
    config::Config,
    error::{OutOfMemory, RegionError},
    header::Tag,
    region::HeapRegion,
    Pointer,
};

/// Bytes requested from the region by [`SegregatedAllocator::init`]: one word
/// of alignment padding, the prologue header and footer, and the epilogue.
pub(crate) const SKELETON_SIZE: usize = 4 * WSIZE;

/// Default number of size classes.
pub const DEFAULT_CLASSES: usize = 20;

/// This is the main allocator. Once you've read [`crate::header`],
/// [`crate::block`], [`crate::list`] and [`crate::bucket`], this is where the
/// circle gets completed. The heap is one contiguous region that looks like
/// this after a few allocations:
///
/// ```text
///  +-----+----------+-----------+-----------+------------+-----------+----------+
///  | pad | prologue |  Alloc 24 |  Free 64  |  Alloc 112 |  Free 512 | epilogue |
///  +-----+----------+-----------+-----|-----+------------+-----|-----+----------+
///                                     |                        |
///             buckets[2] -------------+                        |
///             buckets[5] --------------------------------------+
/// ```
///
/// The prologue is an allocated block with an empty payload and the epilogue
/// is an allocated header of size 0. Neither of them is ever freed, so every
/// real block always has an allocated sentinel on each side and coalescing
/// never needs to check where the heap starts or ends.
///
/// Pointers handed out are [`BlockPtr`] offsets into the region, the payload
/// bytes can be accessed with [`SegregatedAllocator::payload`] and
/// [`SegregatedAllocator::payload_mut`].
///
/// This struct is not thread safe and needs mutable borrows to operate. See
/// [`Segalloc`] for a version that can be shared between threads.
///
/// # Examples
///
/// ```rust
/// use segalloc::{MemRegion, SegregatedAllocator};
///
/// let mut allocator = SegregatedAllocator::new(MemRegion::new());
/// allocator.init().unwrap();
///
/// let ptr = allocator.allocate(5).unwrap();
/// allocator.payload_mut(ptr)[..5].copy_from_slice(b"hello");
///
/// let ptr = allocator.realloc(ptr, 1000).unwrap();
/// assert_eq!(&allocator.payload(ptr)[..5], b"hello");
///
/// allocator.free(ptr);
/// ```
pub struct SegregatedAllocator<R, const N: usize = DEFAULT_CLASSES> {
    /// Memory where all the blocks live.
    pub(crate) region: R,
    /// Free blocks, indexed by size class.
    pub(crate) buckets: Buckets<N>,
    pub(crate) config: Config,
    /// Payload of the prologue block, `None` until [`Self::init`] runs.
    pub(crate) prologue: Pointer,
}

impl<R: HeapRegion> SegregatedAllocator<R> {
    /// Builds an allocator with the default configuration on top of `region`.
    /// Nothing is requested from the region until the first allocation or an
    /// explicit [`Self::init`].
    pub fn new(region: R) -> Self {
        Self::with_config(region, Config::new())
    }

    pub fn with_config(region: R, config: Config) -> Self {
        Self::with_classes(region, config)
    }
}

impl<R: HeapRegion, const N: usize> SegregatedAllocator<R, N> {
    /// Builds an allocator with `N` size classes.
    pub const fn with_classes(region: R, config: Config) -> Self {
        Self {
            region,
            buckets: Buckets::new(),
            config,
            prologue: None,
        }
    }

    /// Lays out the prologue and epilogue and seeds the heap with one free
    /// chunk. Calling this again starts a fresh heap at the current end of
    /// the region, everything allocated before becomes unreachable.
    pub fn init(&mut self) -> Result<(), OutOfMemory> {
        self.buckets = Buckets::new();
        self.prologue = None;

        let start = self.region.grow(SKELETON_SIZE)?;
        let heap = self.region.bytes_mut();

        // Alignment padding, so that payloads land on double words.
        write_word(heap, start, 0);

        let prologue = BlockPtr::from_offset(start + DSIZE);
        prologue.write_tags(heap, Tag::new(DSIZE, true));
        let epilogue = prologue.next(heap);
        write_word(heap, epilogue.header(), Tag::EPILOGUE.to_word());
        self.prologue = Some(prologue);

        self.extend(self.config.chunk_size)?;

        debug!("heap initialized at offset {start}, region size {}", self.region.size());
        self.verify();

        Ok(())
    }

    /// Runs [`Self::init`] if nobody did yet.
    fn ensure_init(&mut self) -> bool {
        if self.prologue.is_some() {
            return true;
        }

        match self.init() {
            Ok(()) => true,
            Err(err) => {
                warn!("heap initialization failed: {err}");
                false
            }
        }
    }

    /// Returns a block whose payload can hold at least `size` bytes, or `None`
    /// if `size` is 0 or the region can't grow anymore. In the latter case the
    /// heap is left exactly as it was.
    pub fn allocate(&mut self, size: usize) -> Pointer {
        if size == 0 || !self.ensure_init() {
            return None;
        }

        let Some(adjusted) = adjust(size) else {
            warn!("allocation of {size} bytes exceeds the maximum block size");
            return None;
        };

        let block = match self.buckets.find_fit(self.region.bytes(), adjusted) {
            Some(block) => block,
            None => match self.extend(adjusted.max(self.config.chunk_size)) {
                Ok(block) => block,
                Err(err) => {
                    warn!("allocation of {size} bytes failed: {err}");
                    return None;
                }
            },
        };

        let block = self.place(block, adjusted);

        trace!("allocated {adjusted} byte block at {} for {size} bytes", block.offset());
        self.verify();

        Some(block)
    }

    /// Gives the block back to the free lists, merging it with its free
    /// neighbours. Freeing `None` does nothing.
    pub fn free(&mut self, ptr: impl Into<Pointer>) {
        let Some(block) = ptr.into() else {
            return;
        };

        if self.prologue.is_none() {
            return;
        }

        let heap = self.region.bytes_mut();
        let size = block.size(heap);
        block.write_tags(heap, Tag::new(size, false));
        self.coalesce(block);

        trace!("freed {size} byte block at {}", block.offset());
        self.verify();
    }

    /// Grows the region by `bytes` (aligned) and turns the new space into a
    /// free block, merged with the last block if that one was free.
    pub(crate) fn extend(&mut self, bytes: usize) -> Result<BlockPtr, RegionError> {
        let size = align(bytes);
        let start = self.region.grow(size)?;
        let heap = self.region.bytes_mut();

        // The header of the new block takes the place of the old epilogue.
        let block = BlockPtr::from_offset(start);
        block.write_tags(heap, Tag::new(size, false));
        let epilogue = block.next(heap);
        write_word(heap, epilogue.header(), Tag::EPILOGUE.to_word());

        debug!("heap extended by {size} bytes, region size {}", self.region.size());

        Ok(self.coalesce(block))
    }

    /// Allocates `size` bytes out of the free `block`. If the leftover can form
    /// a block of its own, small requests are carved from the tail and the
    /// head stays free, while large requests take the head and the tail is
    /// given back. Otherwise the whole block is used.
    pub(crate) fn place(&mut self, block: BlockPtr, size: usize) -> BlockPtr {
        let heap = self.region.bytes_mut();
        let total = block.size(heap);
        self.buckets.remove(heap, block);

        if total - size >= MIN_BLOCK_SIZE && size < self.config.tail_placement_limit {
            block.write_tags(heap, Tag::new(total - size, false));
            self.buckets.insert(heap, block);

            let allocated = block.next(heap);
            allocated.write_tags(heap, Tag::new(size, true));
            trace!("placed {size} bytes at the tail of free block {}", block.offset());

            return allocated;
        }

        trace!("placed {size} bytes at the head of free block {}", block.offset());
        self.trim(block, total, size);

        block
    }

    /// Marks the first `size` bytes of `block`, which actually spans `total`
    /// bytes, as allocated. The rest becomes a free block if it's big enough,
    /// otherwise it stays in the allocated block as padding.
    pub(crate) fn trim(&mut self, block: BlockPtr, total: usize, size: usize) {
        let heap = self.region.bytes_mut();

        if total - size < MIN_BLOCK_SIZE {
            block.write_tags(heap, Tag::new(total, true));
            return;
        }

        block.write_tags(heap, Tag::new(size, true));
        let rest = block.next(heap);
        rest.write_tags(heap, Tag::new(total - size, false));
        self.coalesce(rest);
    }

    /// Merges the free `block` with its free neighbours and adds the result to
    /// the free lists. Returns the merged block, which starts at the previous
    /// block if that one was free.
    ///
    /// ```text
    /// +---------+---------+---------+          +-----------------------------+
    /// |  Free   |  block  |  Free   |   --->   |            Free             |
    /// +---------+---------+---------+          +-----------------------------+
    /// ```
    ///
    /// Neighbours are removed from their lists before any tag changes, since
    /// the list of a block is derived from its current size.
    pub(crate) fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        let heap = self.region.bytes_mut();
        let prev = block.prev(heap);
        let next = block.next(heap);
        let mut size = block.size(heap);

        let merged = match (prev.is_allocated(heap), next.is_allocated(heap)) {
            (true, true) => block,
            (true, false) => {
                self.buckets.remove(heap, next);
                size += next.size(heap);
                block
            }
            (false, true) => {
                self.buckets.remove(heap, prev);
                size += prev.size(heap);
                prev
            }
            (false, false) => {
                self.buckets.remove(heap, prev);
                self.buckets.remove(heap, next);
                size += prev.size(heap) + next.size(heap);
                prev
            }
        };

        if merged != block || size != block.size(heap) {
            trace!("coalesced block at {} into {size} bytes at {}", block.offset(), merged.offset());
        }

        merged.write_tags(heap, Tag::new(size, false));
        self.buckets.insert(heap, merged);

        merged
    }

    /// Number of payload bytes that can be used at `ptr`. Might be more than
    /// what was requested because of alignment and unsplittable leftovers.
    pub fn usable_size(&self, ptr: BlockPtr) -> usize {
        ptr.size(self.region.bytes()) - OVERHEAD
    }

    /// Payload bytes of the allocated block at `ptr`.
    pub fn payload(&self, ptr: BlockPtr) -> &[u8] {
        let heap = self.region.bytes();
        let end = ptr.offset() + ptr.size(heap) - OVERHEAD;
        &heap[ptr.offset()..end]
    }

    /// Mutable payload bytes of the allocated block at `ptr`.
    pub fn payload_mut(&mut self, ptr: BlockPtr) -> &mut [u8] {
        let heap = self.region.bytes_mut();
        let end = ptr.offset() + ptr.size(heap) - OVERHEAD;
        &mut heap[ptr.offset()..end]
    }

    /// Raw address of the payload at `ptr`, for callers that need to hand out
    /// real pointers. Only meaningful for regions whose bytes never move.
    pub fn address_of(&mut self, ptr: BlockPtr) -> Option<NonNull<u8>> {
        let heap = self.region.bytes_mut();

        if ptr.offset() >= heap.len() {
            return None;
        }

        NonNull::new(heap[ptr.offset()..].as_mut_ptr())
    }

    /// Inverse of [`Self::address_of`]. Returns `None` for addresses outside
    /// of the region.
    pub fn pointer_at(&self, address: *const u8) -> Pointer {
        let base = self.region.bytes().as_ptr() as usize;
        let offset = (address as usize).checked_sub(base)?;

        if offset >= self.region.size() {
            return None;
        }

        BlockPtr::new(offset)
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    /// Bytes granted by the region so far.
    pub fn heap_size(&self) -> usize {
        self.region.size()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of blocks currently sitting in the free lists.
    pub fn free_blocks(&self) -> usize {
        self.buckets.len()
    }

    /// Runs the consistency checker if enabled. Never runs in release builds.
    #[inline]
    pub(crate) fn verify(&self) {
        if cfg!(debug_assertions) && self.config.verify {
            if let Err(err) = self.check_heap() {
                panic!("heap consistency check failed: {err}");
            }
        }
    }
}

#[cfg(any(unix, miri))]
pub use global::Segalloc;

#[cfg(any(unix, miri))]
mod global {
    use std::{
        alloc::{GlobalAlloc, Layout},
        ptr::{self, NonNull},
        sync::Mutex,
    };

    use super::SegregatedAllocator;
    use crate::{align::ALIGNMENT, config::Config, platform::MmapRegion};

    /// Thread safe front-end that can be used as the global allocator.
    ///
    /// ```no_run
    /// use segalloc::Segalloc;
    ///
    /// #[global_allocator]
    /// static ALLOCATOR: Segalloc = Segalloc::new();
    ///
    /// fn main() {
    ///     let num = Box::new(5);
    ///     assert_eq!(*num, 5);
    /// }
    /// ```
    ///
    /// Only alignments up to 8 bytes are supported, larger ones get a null
    /// pointer. Don't install a logger that allocates while this is the
    /// global allocator, log records are emitted with the lock held.
    pub struct Segalloc {
        /// One global lock around the whole allocator. The allocator itself
        /// is single threaded and non reentrant.
        allocator: Mutex<SegregatedAllocator<MmapRegion>>,
    }

    impl Segalloc {
        pub const fn new() -> Self {
            Self::with_reservation(MmapRegion::DEFAULT_RESERVATION)
        }

        /// Limits the heap to `bytes` of address space.
        pub const fn with_reservation(bytes: usize) -> Self {
            Self {
                allocator: Mutex::new(SegregatedAllocator::with_classes(
                    MmapRegion::with_reservation(bytes),
                    Config::new(),
                )),
            }
        }
    }

    impl Default for Segalloc {
        fn default() -> Self {
            Self::new()
        }
    }

    unsafe impl GlobalAlloc for Segalloc {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            if layout.align() > ALIGNMENT {
                return ptr::null_mut();
            }

            let Ok(mut allocator) = self.allocator.lock() else {
                return ptr::null_mut();
            };

            allocator
                .allocate(layout.size())
                .and_then(|block| allocator.address_of(block))
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        }

        unsafe fn dealloc(&self, address: *mut u8, _layout: Layout) {
            if let Ok(mut allocator) = self.allocator.lock() {
                let block = allocator.pointer_at(address);
                allocator.free(block);
            }
        }

        unsafe fn realloc(&self, address: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
            if layout.align() > ALIGNMENT {
                return ptr::null_mut();
            }

            let Ok(mut allocator) = self.allocator.lock() else {
                return ptr::null_mut();
            };

            let block = allocator.pointer_at(address);

            allocator
                .realloc(block, new_size)
                .and_then(|block| allocator.address_of(block))
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        }
    }

    #[cfg(test)]
    mod tests {
        use std::{sync, thread};

        use super::*;

        #[test]
        fn raw_pointers() {
            let segalloc = Segalloc::with_reservation(1 << 20);

            unsafe {
                let layout = Layout::array::<u8>(100).unwrap();
                let address = segalloc.alloc(layout);
                assert!(!address.is_null());
                assert_eq!(address as usize % ALIGNMENT, 0);

                for i in 0..100 {
                    *address.add(i) = i as u8;
                }

                let address = segalloc.realloc(address, layout, 5000);
                assert!(!address.is_null());
                for i in 0..100 {
                    assert_eq!(*address.add(i), i as u8);
                }

                segalloc.dealloc(address, Layout::array::<u8>(5000).unwrap());
            }

            let allocator = segalloc.allocator.lock().unwrap();
            assert_eq!(allocator.check_heap().unwrap().allocated_blocks, 0);
        }

        #[test]
        fn large_alignments_are_refused() {
            let segalloc = Segalloc::with_reservation(1 << 20);
            let layout = Layout::from_size_align(64, 64).unwrap();

            unsafe {
                assert!(segalloc.alloc(layout).is_null());
            }
        }

        #[test]
        fn exhausted_reservation_returns_null() {
            let segalloc = Segalloc::with_reservation(1 << 16);
            let layout = Layout::array::<u8>(1 << 17).unwrap();

            unsafe {
                assert!(segalloc.alloc(layout).is_null());
            }
        }

        /// All the threads allocate at the same time, then wait and
        /// deallocate at the same time.
        #[test]
        fn multiple_threads_synchronized_allocs_and_deallocs() {
            let segalloc = Segalloc::with_reservation(1 << 24);
            let num_threads = 8;
            let barrier = sync::Barrier::new(num_threads);

            thread::scope(|scope| {
                for _ in 0..num_threads {
                    scope.spawn(|| unsafe {
                        let num_elements = 1024;
                        let layout = Layout::array::<u64>(num_elements).unwrap();
                        let address = segalloc.alloc(layout).cast::<u64>();
                        assert!(!address.is_null());

                        let id = address as u64;
                        for i in 0..num_elements {
                            *address.add(i) = id;
                        }

                        barrier.wait();

                        // Check memory corruption.
                        for i in 0..num_elements {
                            assert_eq!(*address.add(i), id);
                        }

                        segalloc.dealloc(address.cast(), layout);
                    });
                }
            });

            let allocator = segalloc.allocator.lock().unwrap();
            let stats = allocator.check_heap().unwrap();
            assert_eq!(stats.allocated_blocks, 0);
            assert_eq!(stats.free_blocks, 1);
        }
    }
}
