use crate::{
    block::{read_word, write_word, BlockPtr, WSIZE},
    Pointer,
};

/// When a block is free nobody is using its payload, so we store the free
/// list links right there. Links are region offsets rather than addresses,
/// and 0 means "no block" (see [`BlockPtr`]). This is how a free block looks
/// like in memory:
///
/// ```text
///               +---------------------------+
///               |   header: size | free     |
///  BlockPtr --> +---------------------------+
///               | offset of prev free block |  <- pred
///               +---------------------------+
///               | offset of next free block |  <- succ
///               +---------------------------+
///               |     stale user data       |  <- could be 0 bytes
///               +---------------------------+
///               |   footer: size | free     |
///               +---------------------------+
/// ```
///
/// That's why [`crate::block::MIN_BLOCK_SIZE`] is 4 words.
#[inline]
pub(crate) fn pred(heap: &[u8], block: BlockPtr) -> Pointer {
    BlockPtr::new(read_word(heap, block.offset()) as usize)
}

#[inline]
pub(crate) fn succ(heap: &[u8], block: BlockPtr) -> Pointer {
    BlockPtr::new(read_word(heap, block.offset() + WSIZE) as usize)
}

#[inline]
fn set_pred(heap: &mut [u8], block: BlockPtr, link: Pointer) {
    write_word(heap, block.offset(), encode(link));
}

#[inline]
fn set_succ(heap: &mut [u8], block: BlockPtr, link: Pointer) {
    write_word(heap, block.offset() + WSIZE, encode(link));
}

/// Regions never exceed 4 GiB (see [`crate::region::MAX_REGION_SIZE`]), so
/// offsets always fit in a word.
#[inline]
fn encode(link: Pointer) -> u32 {
    link.map_or(0, |block| block.offset() as u32)
}

/// Doubly linked list of free blocks kept sorted by address. The list itself
/// only knows its head, the nodes live inside the heap so every operation
/// needs the heap bytes. No allocations happen here because, well, we are the
/// allocator.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FreeList {
    pub head: Pointer,
    pub len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Links `block` right before the first node located at a higher address.
    pub fn insert(&mut self, heap: &mut [u8], block: BlockPtr) {
        let mut prev = None;
        let mut current = self.head;

        while let Some(node) = current {
            if node > block {
                break;
            }
            prev = current;
            current = succ(heap, node);
        }

        set_pred(heap, block, prev);
        set_succ(heap, block, current);

        match prev {
            Some(prev) => set_succ(heap, prev, Some(block)),
            None => self.head = Some(block),
        }

        if let Some(next) = current {
            set_pred(heap, next, Some(block));
        }

        self.len += 1;
    }

    /// Unlinks `block`, which must be a node of this list.
    pub fn remove(&mut self, heap: &mut [u8], block: BlockPtr) {
        let prev = pred(heap, block);
        let next = succ(heap, block);

        match prev {
            Some(prev) => set_succ(heap, prev, next),
            None => self.head = next,
        }

        if let Some(next) = next {
            set_pred(heap, next, prev);
        }

        self.len -= 1;
    }

    pub fn iter<'h>(&self, heap: &'h [u8]) -> Iter<'h> {
        Iter {
            heap,
            current: self.head,
        }
    }
}

/// Walks a [`FreeList`] from head to tail.
pub(crate) struct Iter<'h> {
    heap: &'h [u8],
    current: Pointer,
}

impl Iterator for Iter<'_> {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = succ(self.heap, node);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: usize) -> BlockPtr {
        BlockPtr::new(offset).unwrap()
    }

    fn offsets(list: &FreeList, heap: &[u8]) -> Vec<usize> {
        list.iter(heap).map(BlockPtr::offset).collect()
    }

    #[test]
    fn insert_keeps_address_order() {
        let mut heap = vec![0; 256];
        let mut list = FreeList::new();

        for offset in [64, 16, 128, 32, 96] {
            list.insert(&mut heap, block(offset));
        }

        assert_eq!(list.len, 5);
        assert_eq!(offsets(&list, &heap), [16, 32, 64, 96, 128]);

        // Back links mirror forward links.
        assert_eq!(pred(&heap, block(16)), None);
        assert_eq!(pred(&heap, block(64)), Some(block(32)));
        assert_eq!(succ(&heap, block(128)), None);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut heap = vec![0; 256];
        let mut list = FreeList::new();

        for offset in [16, 32, 64, 96] {
            list.insert(&mut heap, block(offset));
        }

        list.remove(&mut heap, block(32));
        assert_eq!(offsets(&list, &heap), [16, 64, 96]);
        assert_eq!(pred(&heap, block(64)), Some(block(16)));

        list.remove(&mut heap, block(16));
        assert_eq!(offsets(&list, &heap), [64, 96]);
        assert_eq!(pred(&heap, block(64)), None);

        list.remove(&mut heap, block(96));
        assert_eq!(offsets(&list, &heap), [64]);
        assert_eq!(succ(&heap, block(64)), None);

        list.remove(&mut heap, block(64));
        assert_eq!(list.head, None);
        assert_eq!(list.len, 0);
    }
}
