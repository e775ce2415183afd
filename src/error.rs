//! Error types. Out of memory is the only error the allocation paths can run
//! into, and even that one is reported to callers as "no allocation" (`None`).
//! [`HeapError`] is only produced by the consistency checker, see
//! [`crate::check`].

use thiserror::Error;

/// Failure reported by a [`crate::region::HeapRegion`] when it can't grow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// The region reached its maximum size.
    #[error("heap region exhausted: requested {requested} bytes but only {remaining} remain")]
    Exhausted { requested: usize, remaining: usize },

    /// The underlying address space reservation could not be made.
    #[error("failed to reserve {length} bytes of address space (os error {errno})")]
    MapFailed { length: usize, errno: i32 },
}

/// Returned by [`crate::SegregatedAllocator::init`] when the region can't
/// provide the initial skeleton or the first chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("out of memory: {0}")]
pub struct OutOfMemory(#[from] pub RegionError);

/// Violation found while walking the heap. Offsets are payload offsets
/// relative to the start of the region unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("prologue block at {offset} is corrupted")]
    BadPrologue { offset: usize },

    #[error("epilogue header at {offset} is corrupted or not at the end of the heap")]
    BadEpilogue { offset: usize },

    #[error("block at {offset} extends outside of the heap")]
    OutOfBounds { offset: usize },

    #[error("block at {offset} is not aligned to a double word")]
    Misaligned { offset: usize },

    #[error("block at {offset} has invalid size {size}")]
    BadSize { offset: usize, size: usize },

    #[error("block at {offset} has header {header:#x} but footer {footer:#x}")]
    TagMismatch { offset: usize, header: u32, footer: u32 },

    #[error("free blocks at {offset} and {next} were not coalesced")]
    Uncoalesced { offset: usize, next: usize },

    #[error("free block at {offset} is not in any free list")]
    NotListed { offset: usize },

    #[error("allocated block at {offset} is in free list {class}")]
    AllocatedInList { offset: usize, class: usize },

    #[error("block at {offset} of size {size} is in free list {class}, expected {expected}")]
    WrongClass { offset: usize, size: usize, class: usize, expected: usize },

    #[error("free list {class} has a broken link at {offset}")]
    BrokenLink { class: usize, offset: usize },

    #[error("free list {class} is not sorted by address at {offset}")]
    Unsorted { class: usize, offset: usize },

    #[error("free lists hold {listed} blocks but the heap has {found} free blocks")]
    CountMismatch { listed: usize, found: usize },
}
