use crate::{block::BlockPtr, list::FreeList, Pointer};

/// Upper bound (inclusive) of the first size class.
const FIRST_CLASS_LIMIT: usize = 16;

/// Segregated free list index. Free blocks are partitioned by size into `N`
/// power of two classes: class `i` holds blocks of size `<= 16 * 2^i` that
/// didn't fit in class `i - 1`, and the last class takes everything else.
///
/// ```text
///               +--------+       +--------+
/// buckets[0] -> |  <=16  | <---> |  <=16  |
///               +--------+       +--------+
///               +--------+
/// buckets[1] -> |  <=32  |
///               +--------+
///
/// .........................................
///
///                 +--------+       +--------+       +--------+
/// buckets[N-1] -> |  any   | <---> |  any   | <---> |  any   |
///                 +--------+       +--------+       +--------+
/// ```
///
/// Each list is sorted by address, so among blocks of equal size the one at
/// the lowest address is reused first.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Buckets<const N: usize> {
    pub lists: [FreeList; N],
}

impl<const N: usize> Buckets<N> {
    /// Compile time check, an index without classes can't hold anything.
    const NOT_EMPTY: () = assert!(N > 0, "at least one size class is required");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NOT_EMPTY;
        const EMPTY: FreeList = FreeList::new();

        Self { lists: [EMPTY; N] }
    }

    /// Returns the class where blocks of `size` bytes belong. Monotonic in
    /// `size`.
    pub fn class_for(size: usize) -> usize {
        let mut limit = FIRST_CLASS_LIMIT;

        for class in 0..N - 1 {
            if size <= limit {
                return class;
            }
            limit = limit.saturating_mul(2);
        }

        N - 1
    }

    /// Adds a free block to the list of its class. The header must already
    /// hold the final size.
    pub fn insert(&mut self, heap: &mut [u8], block: BlockPtr) {
        let class = Self::class_for(block.size(heap));
        self.lists[class].insert(heap, block);
    }

    /// Removes a free block from its list. The class is computed from the
    /// size currently stored in the header, so callers must not change it
    /// before calling this.
    pub fn remove(&mut self, heap: &mut [u8], block: BlockPtr) {
        let class = Self::class_for(block.size(heap));
        self.lists[class].remove(heap, block);
    }

    /// Best fit search bounded by size classes. Starting at the class of
    /// `size`, returns the smallest block that can hold `size` bytes from the
    /// first class that has any. Larger classes only contain larger blocks,
    /// so they can't beat a candidate found in a smaller one.
    pub fn find_fit(&self, heap: &[u8], size: usize) -> Pointer {
        self.lists[Self::class_for(size)..].iter().find_map(|list| {
            list.iter(heap)
                .filter(|block| block.size(heap) >= size)
                .min_by_key(|block| block.size(heap))
        })
    }

    /// Number of free blocks across all classes.
    pub fn len(&self) -> usize {
        self.lists.iter().map(|list| list.len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{write_word, DSIZE},
        header::Tag,
    };

    /// Writes free blocks of the given sizes back to back, with one allocated
    /// minimum block between each of them so they stay separate.
    fn free_blocks(sizes: &[usize]) -> (Vec<u8>, Vec<BlockPtr>) {
        let total = DSIZE + sizes.iter().map(|size| size + 16).sum::<usize>() + DSIZE;
        let mut heap = vec![0; total];
        let mut offset = DSIZE;
        let mut blocks = Vec::new();

        for size in sizes {
            let block = BlockPtr::new(offset).unwrap();
            block.write_tags(&mut heap, Tag::new(*size, false));
            blocks.push(block);
            let separator = block.next(&heap);
            separator.write_tags(&mut heap, Tag::new(16, true));
            offset = separator.next(&heap).offset();
        }
        write_word(&mut heap, offset - 4, Tag::EPILOGUE.to_word());

        (heap, blocks)
    }

    #[test]
    fn size_classes() {
        type B = Buckets<20>;

        assert_eq!(B::class_for(16), 0);
        assert_eq!(B::class_for(24), 1);
        assert_eq!(B::class_for(32), 1);
        assert_eq!(B::class_for(40), 2);
        assert_eq!(B::class_for(64), 2);
        assert_eq!(B::class_for(4096), 8);
        assert_eq!(B::class_for(4104), 9);
        assert_eq!(B::class_for(usize::MAX), 19);

        // Monotonic.
        let mut last = 0;
        for size in (16..1 << 24).step_by(8 * 997) {
            let class = B::class_for(size);
            assert!(class >= last);
            last = class;
        }
    }

    #[test]
    fn single_class() {
        assert_eq!(Buckets::<1>::class_for(16), 0);
        assert_eq!(Buckets::<1>::class_for(1 << 20), 0);
    }

    #[test]
    fn insert_and_remove_use_the_class_of_the_block() {
        let (mut heap, blocks) = free_blocks(&[16, 48, 48, 200]);
        let mut buckets = Buckets::<20>::new();

        for block in &blocks {
            buckets.insert(&mut heap, *block);
        }

        assert_eq!(buckets.lists[0].len, 1);
        assert_eq!(buckets.lists[2].len, 2);
        assert_eq!(buckets.lists[4].len, 1);
        assert_eq!(buckets.len(), 4);

        buckets.remove(&mut heap, blocks[1]);
        assert_eq!(buckets.lists[2].len, 1);
        assert_eq!(buckets.lists[2].head, Some(blocks[2]));
    }

    #[test]
    fn best_fit_within_first_class_with_candidates() {
        // 56 and 48 share class 2, 120 is in class 3.
        let (mut heap, blocks) = free_blocks(&[56, 120, 48]);
        let mut buckets = Buckets::<20>::new();
        for block in &blocks {
            buckets.insert(&mut heap, *block);
        }

        // Smallest adequate block in class 2 wins even though 56 comes first.
        assert_eq!(buckets.find_fit(&heap, 40), Some(blocks[2]));
        assert_eq!(buckets.find_fit(&heap, 56), Some(blocks[0]));

        // Nothing in class 2 fits, move on to class 3.
        assert_eq!(buckets.find_fit(&heap, 64), Some(blocks[1]));

        assert_eq!(buckets.find_fit(&heap, 128), None);
    }

    #[test]
    fn ties_go_to_the_lowest_address() {
        let (mut heap, blocks) = free_blocks(&[32, 32, 32]);
        let mut buckets = Buckets::<20>::new();
        for block in blocks.iter().rev() {
            buckets.insert(&mut heap, *block);
        }

        assert_eq!(buckets.find_fit(&heap, 24), Some(blocks[0]));
    }
}
