//! Heap consistency checker. Walks the free lists and then every block of the
//! heap, validating the invariants the allocator relies on. It never panics
//! and never writes, so it can be pointed at a corrupted heap.

use std::collections::BTreeMap;

use crate::{
    block::{BlockPtr, DSIZE, MIN_BLOCK_SIZE, WSIZE},
    bucket::Buckets,
    error::HeapError,
    header::Tag,
    list,
    region::HeapRegion,
    SegregatedAllocator,
};

/// Summary of a consistent heap, returned by
/// [`SegregatedAllocator::check_heap`]. Sentinels are not counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    /// Total size of allocated blocks, including headers and footers.
    pub allocated_bytes: usize,
    /// Total size of free blocks, including headers and footers.
    pub free_bytes: usize,
    pub largest_free: usize,
}

impl HeapStats {
    /// Bytes covered by blocks. Adding the sentinels gives the size of the
    /// heap since it was last initialized.
    pub fn total_bytes(&self) -> usize {
        self.allocated_bytes + self.free_bytes
    }
}

/// Bounds checked version of [`crate::block::read_word`].
fn word_at(heap: &[u8], offset: usize) -> Option<u32> {
    let bytes = heap.get(offset..offset.checked_add(WSIZE)?)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

/// Validates the boundary tags of a regular block and returns its header.
fn check_block(heap: &[u8], block: BlockPtr) -> Result<Tag, HeapError> {
    let offset = block.offset();

    if offset % DSIZE != 0 {
        return Err(HeapError::Misaligned { offset });
    }

    let header = offset
        .checked_sub(WSIZE)
        .and_then(|header| word_at(heap, header))
        .ok_or(HeapError::OutOfBounds { offset })?;
    let tag = Tag::from_word(header);
    let size = tag.size();

    if size < MIN_BLOCK_SIZE {
        return Err(HeapError::BadSize { offset, size });
    }

    // The block has to end before the epilogue header.
    let footer = offset + size - DSIZE;
    if footer + 2 * WSIZE > heap.len() {
        return Err(HeapError::OutOfBounds { offset });
    }

    let footer = word_at(heap, footer).ok_or(HeapError::OutOfBounds { offset })?;
    if footer != header {
        return Err(HeapError::TagMismatch { offset, header, footer });
    }

    Ok(tag)
}

impl<R: HeapRegion, const N: usize> SegregatedAllocator<R, N> {
    /// Validates the whole heap:
    ///
    /// - Sentinels are intact and the epilogue is the last word of the heap.
    /// - Every block is aligned, in bounds, and its header matches its footer.
    /// - No two free blocks are adjacent.
    /// - Every free block is in the list of its class exactly once, and
    ///   nothing else is in any list.
    /// - Lists are sorted by address and their back links mirror the forward
    ///   links.
    ///
    /// Returns the first violation found. An allocator that was never
    /// initialized has an empty, consistent heap.
    pub fn check_heap(&self) -> Result<HeapStats, HeapError> {
        let Some(prologue) = self.prologue else {
            return Ok(HeapStats::default());
        };

        let heap = self.region.bytes();
        let listed = self.check_lists(heap)?;
        let stats = self.check_blocks(heap, prologue, &listed)?;

        if listed.len() != stats.free_blocks || self.buckets.len() != stats.free_blocks {
            return Err(HeapError::CountMismatch {
                listed: listed.len().max(self.buckets.len()),
                found: stats.free_blocks,
            });
        }

        Ok(stats)
    }

    /// Walks every free list and returns the class each listed block was
    /// found in.
    fn check_lists(&self, heap: &[u8]) -> Result<BTreeMap<BlockPtr, usize>, HeapError> {
        let mut listed = BTreeMap::new();

        for (class, free_list) in self.buckets.lists.iter().enumerate() {
            let mut prev = None;
            let mut current = free_list.head;

            while let Some(block) = current {
                let offset = block.offset();
                let tag = check_block(heap, block)?;

                if tag.is_allocated() {
                    return Err(HeapError::AllocatedInList { offset, class });
                }

                let expected = Buckets::<N>::class_for(tag.size());
                if expected != class {
                    return Err(HeapError::WrongClass {
                        offset,
                        size: tag.size(),
                        class,
                        expected,
                    });
                }

                if list::pred(heap, block) != prev {
                    return Err(HeapError::BrokenLink { class, offset });
                }

                if prev.is_some_and(|prev| prev >= block) {
                    return Err(HeapError::Unsorted { class, offset });
                }

                // Sorted lists can't loop, but a block could still show up
                // in two different lists.
                if listed.insert(block, class).is_some() {
                    return Err(HeapError::BrokenLink { class, offset });
                }

                prev = current;
                current = list::succ(heap, block);
            }
        }

        Ok(listed)
    }

    /// Walks the heap block by block from the prologue to the epilogue.
    fn check_blocks(
        &self,
        heap: &[u8],
        prologue: BlockPtr,
        listed: &BTreeMap<BlockPtr, usize>,
    ) -> Result<HeapStats, HeapError> {
        let sentinel = Tag::new(DSIZE, true).to_word();
        let intact = prologue.offset() >= self.region.lo() + DSIZE
            && word_at(heap, prologue.header()) == Some(sentinel)
            && word_at(heap, prologue.offset()) == Some(sentinel);

        if !intact {
            return Err(HeapError::BadPrologue {
                offset: prologue.offset(),
            });
        }

        let mut stats = HeapStats::default();
        let mut prev_free: Option<BlockPtr> = None;
        let mut block = BlockPtr::from_offset(prologue.offset() + DSIZE);

        loop {
            let offset = block.offset();
            let header = word_at(heap, block.header()).ok_or(HeapError::OutOfBounds { offset })?;

            if Tag::from_word(header).size() == 0 {
                let last = block.header() + WSIZE - 1;
                if header != Tag::EPILOGUE.to_word() || self.region.hi() != Some(last) {
                    return Err(HeapError::BadEpilogue {
                        offset: block.header(),
                    });
                }
                break;
            }

            let tag = check_block(heap, block)?;
            let size = tag.size();
            stats.blocks += 1;

            if tag.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size;
                prev_free = None;
            } else {
                if let Some(prev) = prev_free {
                    return Err(HeapError::Uncoalesced {
                        offset: prev.offset(),
                        next: offset,
                    });
                }

                let expected = Buckets::<N>::class_for(size);
                match listed.get(&block) {
                    None => return Err(HeapError::NotListed { offset }),
                    Some(&class) if class != expected => {
                        return Err(HeapError::WrongClass {
                            offset,
                            size,
                            class,
                            expected,
                        })
                    }
                    Some(_) => {}
                }

                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = stats.largest_free.max(size);
                prev_free = Some(block);
            }

            block = BlockPtr::from_offset(offset + size);
        }

        Ok(stats)
    }
}
