//! General purpose allocator that manages one contiguous, growable heap
//! region. Free blocks are indexed by size class in segregated free lists,
//! every block carries a boundary tag at both ends, and adjacent free blocks
//! are merged immediately when they are freed:
//!
//! ```text
//!  +-----+----------+--------+--------+--------+-----+--------+----------+
//!  | pad | prologue | block  | block  | block  | ... | block  | epilogue | <- break
//!  +-----+----------+--------+--------+--------+-----+--------+----------+
//!     0        8     16
//! ```
//!
//! The region only grows at the end, like the program break moved by `sbrk`.
//! [`MemRegion`] simulates it with an owned buffer and [`MmapRegion`] reserves
//! real address space, which is what [`Segalloc`] uses to work as the global
//! allocator.
//!
//! ```rust
//! use segalloc::{MemRegion, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::new(MemRegion::new());
//!
//! let ptr = allocator.allocate(64).unwrap();
//! allocator.payload_mut(ptr)[..3].copy_from_slice(&[1, 2, 3]);
//!
//! let ptr = allocator.realloc(ptr, 4096).unwrap();
//! assert_eq!(allocator.payload(ptr)[..3], [1, 2, 3]);
//!
//! allocator.free(ptr);
//! assert_eq!(allocator.check_heap().unwrap().allocated_blocks, 0);
//! ```

mod align;
mod allocator;
mod block;
mod bucket;
mod check;
mod config;
mod error;
mod header;
mod list;
#[cfg(any(unix, miri))]
mod platform;
mod realloc;
mod region;

/// Optional block, `None` means "no block". Returned by allocation functions
/// and used for free list links.
pub(crate) type Pointer = Option<block::BlockPtr>;

pub use align::{align, ALIGNMENT};
#[cfg(any(unix, miri))]
pub use allocator::Segalloc;
pub use allocator::{SegregatedAllocator, DEFAULT_CLASSES};
pub use block::BlockPtr;
pub use check::HeapStats;
pub use config::Config;
pub use error::{HeapError, OutOfMemory, RegionError};
#[cfg(any(unix, miri))]
pub use platform::MmapRegion;
pub use region::{HeapRegion, MemRegion, MAX_REGION_SIZE};
