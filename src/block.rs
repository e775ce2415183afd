use std::num::NonZeroUsize;

use crate::header::Tag;

/// Word size in bytes. Headers, footers and free list links are one word.
pub(crate) const WSIZE: usize = 4;

/// Double word size in bytes.
pub(crate) const DSIZE: usize = 2 * WSIZE;

/// Bytes of every block that the caller can't use: header plus footer.
pub(crate) const OVERHEAD: usize = 2 * WSIZE;

/// Minimum block size in bytes. A free block has to hold its header, its
/// footer and two free list links, see [`crate::list`].
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Offset of a block payload inside the heap region. This is what the
/// allocator hands out instead of raw addresses: the payload of a block is
/// the `usable_size` bytes starting at [`BlockPtr::offset`]. Here's how a
/// block looks like in memory:
///
/// ```text
///               +---------------------------+
///               | header: size | allocated  |  <- 1 word
///  BlockPtr --> +---------------------------+
///               |                           |
///               |          payload          |
///               |                           |
///               +---------------------------+
///               | footer: size | allocated  |  <- 1 word
///               +---------------------------+
///               |    next block header      |
///               +---------------------------+
/// ```
///
/// Offset 0 always belongs to the alignment pad at the start of the heap, so
/// it can never be a payload. We use that to encode "no block" as 0 in the
/// free list links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(NonZeroUsize);

impl BlockPtr {
    /// Builds a pointer from a payload offset, `None` if `offset` is 0.
    #[inline]
    pub(crate) fn new(offset: usize) -> Option<Self> {
        NonZeroUsize::new(offset).map(Self)
    }

    /// Builds a pointer from an offset that is known to be a payload.
    #[inline]
    pub(crate) fn from_offset(offset: usize) -> Self {
        match Self::new(offset) {
            Some(ptr) => ptr,
            None => unreachable!("offset 0 is the alignment pad, not a payload"),
        }
    }

    /// Offset of the first payload byte from the start of the region.
    #[inline]
    pub fn offset(self) -> usize {
        self.0.get()
    }

    /// Offset of the header word.
    #[inline]
    pub(crate) fn header(self) -> usize {
        self.offset() - WSIZE
    }

    /// Offset of the footer word. The footer lives at the end of the block,
    /// so we need the size stored in the header to find it.
    #[inline]
    pub(crate) fn footer(self, heap: &[u8]) -> usize {
        self.offset() + self.size(heap) - DSIZE
    }

    #[inline]
    pub(crate) fn tag(self, heap: &[u8]) -> Tag {
        Tag::from_word(read_word(heap, self.header()))
    }

    /// Total block size, including header and footer.
    #[inline]
    pub(crate) fn size(self, heap: &[u8]) -> usize {
        self.tag(heap).size()
    }

    #[inline]
    pub(crate) fn is_allocated(self, heap: &[u8]) -> bool {
        self.tag(heap).is_allocated()
    }

    /// Block located right after this one. Blocks are contiguous, so it
    /// starts where this one ends. After the last block this returns the
    /// epilogue, whose size is 0.
    #[inline]
    pub(crate) fn next(self, heap: &[u8]) -> Self {
        Self::from_offset(self.offset() + self.size(heap))
    }

    /// Block located right before this one. Its size is read from its footer,
    /// which sits right before our header. For the first block this returns
    /// the prologue, which is always allocated.
    #[inline]
    pub(crate) fn prev(self, heap: &[u8]) -> Self {
        let size = Tag::from_word(read_word(heap, self.offset() - DSIZE)).size();
        Self::from_offset(self.offset() - size)
    }

    /// Writes `tag` to both ends of the block. The header is written first
    /// because the footer position depends on the new size.
    #[inline]
    pub(crate) fn write_tags(self, heap: &mut [u8], tag: Tag) {
        write_word(heap, self.header(), tag.to_word());
        let footer = self.footer(heap);
        write_word(heap, footer, tag.to_word());
    }
}

/// Reads the word at `offset`. Out of bounds reads panic, they can only happen
/// if the caller corrupted the heap.
#[inline]
pub(crate) fn read_word(heap: &[u8], offset: usize) -> u32 {
    let mut word = [0; WSIZE];
    word.copy_from_slice(&heap[offset..offset + WSIZE]);
    u32::from_ne_bytes(word)
}

#[inline]
pub(crate) fn write_word(heap: &mut [u8], offset: usize, word: u32) {
    heap[offset..offset + WSIZE].copy_from_slice(&word.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays out `[pad | prologue | blocks... | epilogue]` like the allocator
    /// does and returns the heap plus the payload of every block.
    fn layout(blocks: &[(usize, bool)]) -> (Vec<u8>, Vec<BlockPtr>) {
        let total = 2 * DSIZE + blocks.iter().map(|(size, _)| size).sum::<usize>();
        let mut heap = vec![0; total];

        let prologue = BlockPtr::from_offset(DSIZE);
        prologue.write_tags(&mut heap, Tag::new(DSIZE, true));

        let mut ptrs = Vec::new();
        let mut current = prologue.next(&heap);
        for (size, allocated) in blocks {
            current.write_tags(&mut heap, Tag::new(*size, *allocated));
            ptrs.push(current);
            current = current.next(&heap);
        }
        write_word(&mut heap, current.header(), Tag::EPILOGUE.to_word());

        (heap, ptrs)
    }

    #[test]
    fn header_and_footer_addresses() {
        let (heap, ptrs) = layout(&[(24, true), (32, false)]);

        assert_eq!(ptrs[0].offset(), 2 * DSIZE);
        assert_eq!(ptrs[0].header(), 2 * DSIZE - WSIZE);
        assert_eq!(ptrs[0].footer(&heap), 2 * DSIZE + 24 - DSIZE);
        assert_eq!(ptrs[1].offset(), 2 * DSIZE + 24);

        for ptr in &ptrs {
            assert_eq!(read_word(&heap, ptr.header()), read_word(&heap, ptr.footer(&heap)));
        }
    }

    #[test]
    fn rewriting_tags_moves_the_footer() {
        let (mut heap, ptrs) = layout(&[(48, false), (16, true)]);
        let block = ptrs[0];

        block.write_tags(&mut heap, Tag::new(32, true));
        assert_eq!(block.footer(&heap), block.offset() + 32 - DSIZE);
        assert_eq!(read_word(&heap, block.footer(&heap)), Tag::new(32, true).to_word());

        // The old footer is untouched, it now belongs to whatever comes next.
        assert_eq!(read_word(&heap, block.offset() + 48 - DSIZE), Tag::new(48, false).to_word());
    }

    #[test]
    fn neighbours() {
        let (heap, ptrs) = layout(&[(16, true), (40, false), (24, true)]);

        assert_eq!(ptrs[0].next(&heap), ptrs[1]);
        assert_eq!(ptrs[1].next(&heap), ptrs[2]);
        assert_eq!(ptrs[2].prev(&heap), ptrs[1]);
        assert_eq!(ptrs[1].prev(&heap), ptrs[0]);

        assert_eq!(ptrs[1].size(&heap), 40);
        assert!(!ptrs[1].is_allocated(&heap));
        assert!(ptrs[2].is_allocated(&heap));
    }

    #[test]
    fn sentinels_at_the_boundaries() {
        let (heap, ptrs) = layout(&[(32, false)]);

        // Previous block of the first block is the allocated prologue.
        let prologue = ptrs[0].prev(&heap);
        assert_eq!(prologue.offset(), DSIZE);
        assert!(prologue.is_allocated(&heap));
        assert_eq!(prologue.size(&heap), DSIZE);

        // Next block of the last block is the zero sized epilogue.
        let epilogue = ptrs[0].next(&heap);
        assert_eq!(epilogue.tag(&heap), Tag::EPILOGUE);
        assert_eq!(epilogue.header(), heap.len() - WSIZE);
    }

    #[test]
    fn null_offset() {
        assert_eq!(BlockPtr::new(0), None);
        assert_eq!(BlockPtr::new(16).map(BlockPtr::offset), Some(16));
    }
}
