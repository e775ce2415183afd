use std::{
    ptr::NonNull,
    slice,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::RegionError,
    region::{HeapRegion, MAX_REGION_SIZE},
};

/// Abstraction for platform specific memory handling. The heap region only
/// needs to reserve one big chunk of address space and give it back when it's
/// dropped, it doesn't care about the APIs offered by the underlying kernel.
trait PlatformSpecificMemory {
    /// Requests a memory region from the kernel where `length` bytes can be
    /// written safely.
    unsafe fn request_memory(length: usize) -> Option<NonNull<u8>>;

    /// Returns `length` bytes starting from `address` to the kernel.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
struct Platform;

/// Cached page size, 0 until the first query.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// We only know the value of the page size at runtime, so we'll ask once and
/// reuse it afterwards.
#[inline]
pub(crate) fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Platform::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Heap region carved out of one anonymous memory mapping. The whole
/// reservation is mapped the first time the region grows and the break then
/// moves forward inside it, so the kernel only backs the pages we actually
/// touch. The mapping is released when the region is dropped.
///
/// Construction is `const` and doesn't touch the kernel, so this region can
/// live inside a `static` global allocator.
#[derive(Debug)]
pub struct MmapRegion {
    /// Start of the mapping, `None` until the first [`HeapRegion::grow`].
    base: Option<NonNull<u8>>,
    /// Length of the mapping in bytes.
    reserved: usize,
    /// Current break, bytes granted so far.
    brk: usize,
}

/// The region exclusively owns its mapping, nobody else has the base pointer.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// 256 MiB of address space. Only touched pages consume memory.
    pub const DEFAULT_RESERVATION: usize = 256 * (1 << 20);

    pub const fn new() -> Self {
        Self::with_reservation(Self::DEFAULT_RESERVATION)
    }

    /// Builds a region that can grow up to `bytes` (rounded up to the page
    /// size once the mapping is made, clamped to [`MAX_REGION_SIZE`]).
    pub const fn with_reservation(bytes: usize) -> Self {
        Self {
            base: None,
            reserved: if bytes > MAX_REGION_SIZE {
                MAX_REGION_SIZE
            } else {
                bytes
            },
            brk: 0,
        }
    }

    /// Maximum size of the region.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Maps the reservation if that didn't happen yet.
    fn base(&mut self) -> Result<NonNull<u8>, RegionError> {
        if let Some(base) = self.base {
            return Ok(base);
        }

        let page = page_size();
        let length = (self.reserved.min(MAX_REGION_SIZE - page) + page - 1) / page * page;

        match unsafe { Platform::request_memory(length) } {
            Some(base) => {
                log::debug!("reserved {length} bytes of address space at {base:?}");
                self.base = Some(base);
                self.reserved = length;
                Ok(base)
            }
            None => Err(RegionError::MapFailed {
                length,
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            }),
        }
    }
}

impl Default for MmapRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapRegion for MmapRegion {
    fn grow(&mut self, increment: usize) -> Result<usize, RegionError> {
        self.base()?;

        let start = self.brk;
        let remaining = self.reserved - start;

        if increment > remaining {
            return Err(RegionError::Exhausted {
                requested: increment,
                remaining,
            });
        }

        self.brk += increment;

        Ok(start)
    }

    fn size(&self) -> usize {
        self.brk
    }

    fn bytes(&self) -> &[u8] {
        match self.base {
            // SAFETY: The first `brk` bytes of the mapping are readable and
            // writable and nothing else references them.
            Some(base) => unsafe { slice::from_raw_parts(base.as_ptr(), self.brk) },
            None => &[],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self.base {
            // SAFETY: Same as above, and `&mut self` guarantees exclusivity.
            Some(base) => unsafe { slice::from_raw_parts_mut(base.as_ptr(), self.brk) },
            None => &mut [],
        }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            unsafe { Platform::return_memory(base, self.reserved) }
        }
    }
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any
            // file. We reserve much more than we'll probably use, so don't ask
            // the kernel to set aside swap space for all of it.
            #[cfg(any(target_os = "linux", target_os = "android"))]
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let address = libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0);

            if address == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(address.cast())
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                log::warn!("munmap of {length} bytes at {address:?} failed");
            }
        }

        unsafe fn page_size() -> usize {
            libc::sysconf(libc::_SC_PAGE_SIZE) as usize
        }
    }
}

#[cfg(miri)]
mod miri {
    //! When using Miri, we can't rely on system calls such as `mmap` because
    //! there's no FFI support, so instead we'll use the global allocator to
    //! mock the reservation.

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Platform, PlatformSpecificMemory};

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, page_size()).unwrap()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            NonNull::new(alloc::alloc_zeroed(to_layout(length)))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_reservation() {
        let mut region = MmapRegion::with_reservation(1 << 20);
        assert_eq!(region.size(), 0);
        assert!(region.bytes().is_empty());

        assert_eq!(region.grow(64), Ok(0));
        assert_eq!(region.grow(64), Ok(64));
        assert_eq!(region.size(), 128);
        assert_eq!(region.reserved() % page_size(), 0);

        let base = region.bytes().as_ptr();
        region.bytes_mut().fill(7);
        region.grow(4096).unwrap();

        assert_eq!(region.bytes().as_ptr(), base);
        assert!(region.bytes()[..128].iter().all(|byte| *byte == 7));
        assert!(region.bytes()[128..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn reservation_is_a_hard_limit() {
        let mut region = MmapRegion::with_reservation(page_size());
        let reserved = page_size();

        assert_eq!(region.grow(reserved), Ok(0));
        assert_eq!(
            region.grow(8),
            Err(RegionError::Exhausted {
                requested: 8,
                remaining: 0
            })
        );
    }
}
