use crate::align::ALIGNMENT;

/// Largest block size a [`Tag`] can describe. Sizes are stored in 32 bit
/// words and the low 3 bits are reserved for flags.
pub(crate) const MAX_BLOCK_SIZE: usize = (u32::MAX & !Tag::FLAGS) as usize;

/// Boundary tag. Every block starts with one (the header) and ends with a
/// copy of it (the footer). Since block sizes are always multiples of 8, the
/// 3 least significant bits of the size are always 0 and we can use one of
/// them to store whether the block is allocated or not:
///
/// ```text
///  31                                                3   2   1   0
/// +---------------------------------------------------+---+---+---+
/// |                     block size                    | 0 | 0 | a |
/// +---------------------------------------------------+---+---+---+
/// ```
///
/// The size always includes header, footer, payload and padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag(u32);

impl Tag {
    /// Mask of the bits that are not part of the size.
    const FLAGS: u32 = 0x7;

    /// Allocated bit.
    const ALLOCATED: u32 = 0x1;

    /// Header of the zero sized block that marks the end of the heap.
    pub const EPILOGUE: Self = Self(Self::ALLOCATED);

    /// Packs `size` and `allocated` into one tag. `size` must be a multiple of
    /// [`ALIGNMENT`] no greater than [`MAX_BLOCK_SIZE`].
    #[inline]
    pub fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size % ALIGNMENT == 0, "block size {size} is not aligned");
        debug_assert!(size <= MAX_BLOCK_SIZE, "block size {size} does not fit a tag");

        Self(size as u32 | if allocated { Self::ALLOCATED } else { 0 })
    }

    /// Reinterprets a raw word read from the heap.
    #[inline]
    pub const fn from_word(word: u32) -> Self {
        Self(word)
    }

    /// Raw word to be written to the heap.
    #[inline]
    pub const fn to_word(self) -> u32 {
        self.0
    }

    /// Total block size in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & !Self::FLAGS) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED != 0
    }
}
