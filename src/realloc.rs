use log::{debug, trace, warn};

use crate::{
    align::adjust,
    block::{write_word, BlockPtr, OVERHEAD},
    header::Tag,
    region::HeapRegion,
    Pointer, SegregatedAllocator,
};

/// This is used to carry realloc metadata around the code as we don't want to
/// pass the same parameters over and over again.
pub(crate) struct Realloc {
    /// Block whose contents we are trying to reallocate.
    pub block: BlockPtr,
    /// Current total size of `block`.
    pub old_size: usize,
    /// Total size the block should have, see [`crate::align::adjust`].
    pub new_size: usize,
    /// Payload size requested by the caller.
    pub requested: usize,
}

impl Realloc {
    /// Number of payload bytes that have to survive the reallocation.
    pub fn count(&self) -> usize {
        (self.old_size - OVERHEAD).min(self.requested)
    }
}

impl<R: HeapRegion, const N: usize> SegregatedAllocator<R, N> {
    /// Resizes the allocation at `ptr` to hold `size` bytes, preserving its
    /// contents up to the smaller of the two sizes.
    ///
    /// - `None` behaves like [`Self::allocate`].
    /// - A `size` of 0 behaves like [`Self::free`] and returns `None`.
    /// - Shrinking always happens in place and returns `ptr`.
    /// - Growing tries, in this order, to absorb the next block, to extend
    ///   the heap if the block is the last one, to absorb the previous block
    ///   and to absorb both neighbours. Only if none of that works the
    ///   contents are moved to a new allocation.
    ///
    /// If the new allocation fails, `None` is returned and `ptr` remains
    /// valid and untouched.
    pub fn realloc(&mut self, ptr: impl Into<Pointer>, size: usize) -> Pointer {
        let Some(block) = ptr.into() else {
            return self.allocate(size);
        };

        if size == 0 {
            self.free(block);
            return None;
        }

        let Some(new_size) = adjust(size) else {
            warn!("reallocation to {size} bytes exceeds the maximum block size");
            return None;
        };

        let realloc = Realloc {
            block,
            old_size: block.size(self.region.bytes()),
            new_size,
            requested: size,
        };

        let result = if realloc.new_size <= realloc.old_size {
            self.trim(block, realloc.old_size, realloc.new_size);
            trace!("shrunk block at {} to {new_size} bytes", block.offset());
            Some(block)
        } else {
            self.grow_into_next(&realloc)
                .or_else(|| self.grow_at_end(&realloc))
                .or_else(|| self.grow_into_prev(&realloc))
                .or_else(|| self.grow_into_both(&realloc))
                .or_else(|| self.relocate(&realloc))
        };

        self.verify();

        result
    }

    /// Grows in place by taking over the next block if it's free and big
    /// enough.
    ///
    /// ```text
    /// +-----------+---------+          +---------------+-----+
    /// |   block   |  Free   |   --->   |     block     |Free |
    /// +-----------+---------+          +---------------+-----+
    /// ```
    fn grow_into_next(&mut self, realloc: &Realloc) -> Pointer {
        let heap = self.region.bytes_mut();
        let next = realloc.block.next(heap);

        if next.is_allocated(heap) {
            return None;
        }

        let total = realloc.old_size + next.size(heap);
        if total < realloc.new_size {
            return None;
        }

        self.buckets.remove(heap, next);
        self.trim(realloc.block, total, realloc.new_size);

        trace!("grew block at {} into its next block", realloc.block.offset());

        Some(realloc.block)
    }

    /// Grows in place when the block is the last one of the heap by extending
    /// the region exactly as much as needed.
    fn grow_at_end(&mut self, realloc: &Realloc) -> Pointer {
        let heap = self.region.bytes();
        if realloc.block.next(heap).tag(heap) != Tag::EPILOGUE {
            return None;
        }

        if let Err(err) = self.region.grow(realloc.new_size - realloc.old_size) {
            debug!("can't grow block at {} at the end of the heap: {err}", realloc.block.offset());
            return None;
        }

        // The old epilogue becomes part of the block, write a new one after it.
        let heap = self.region.bytes_mut();
        realloc.block.write_tags(heap, Tag::new(realloc.new_size, true));
        let epilogue = realloc.block.next(heap);
        write_word(heap, epilogue.header(), Tag::EPILOGUE.to_word());

        trace!("grew block at {} by extending the heap", realloc.block.offset());

        Some(realloc.block)
    }

    /// Takes over the previous block if it's free and big enough. The payload
    /// has to be moved down to the start of the previous block, and since the
    /// two ranges may overlap this is a `memmove`, not a `memcpy`.
    ///
    /// ```text
    /// +---------+-----------+          +---------------+-----+
    /// |  Free   |   block   |   --->   |     block     |Free |
    /// +---------+-----------+          +---------------+-----+
    /// ```
    fn grow_into_prev(&mut self, realloc: &Realloc) -> Pointer {
        let heap = self.region.bytes_mut();
        let prev = realloc.block.prev(heap);

        if prev.is_allocated(heap) {
            return None;
        }

        let total = prev.size(heap) + realloc.old_size;
        if total < realloc.new_size {
            return None;
        }

        self.buckets.remove(heap, prev);
        self.move_payload(realloc, prev);
        self.trim(prev, total, realloc.new_size);

        trace!("grew block at {} into its previous block", realloc.block.offset());

        Some(prev)
    }

    /// Last in place attempt, both neighbours are free and only together they
    /// make enough room.
    fn grow_into_both(&mut self, realloc: &Realloc) -> Pointer {
        let heap = self.region.bytes_mut();
        let prev = realloc.block.prev(heap);
        let next = realloc.block.next(heap);

        if prev.is_allocated(heap) || next.is_allocated(heap) {
            return None;
        }

        let total = prev.size(heap) + realloc.old_size + next.size(heap);
        if total < realloc.new_size {
            return None;
        }

        self.buckets.remove(heap, prev);
        self.buckets.remove(heap, next);
        self.move_payload(realloc, prev);
        self.trim(prev, total, realloc.new_size);

        trace!("grew block at {} into both neighbours", realloc.block.offset());

        Some(prev)
    }

    /// Moves the contents to a brand new allocation and frees the old block.
    /// If the allocation fails nothing is touched.
    fn relocate(&mut self, realloc: &Realloc) -> Pointer {
        let new = self.allocate(realloc.requested)?;
        self.move_payload(realloc, new);
        self.free(realloc.block);

        debug!(
            "moved {} bytes from {} to {}",
            realloc.count(),
            realloc.block.offset(),
            new.offset()
        );

        Some(new)
    }

    /// Copies the live payload bytes of `realloc.block` to `destination`.
    fn move_payload(&mut self, realloc: &Realloc, destination: BlockPtr) {
        let source = realloc.block.offset();
        self.region
            .bytes_mut()
            .copy_within(source..source + realloc.count(), destination.offset());
    }
}
