//! Memory mapping helpers for the handoff channel.
//!
//! A channel is one fixed-size arena addressed by both the producer and the
//! drainer thread. This module allocates that arena as a contiguous, aligned,
//! zero-filled block, preferring an anonymous mapping over the heap.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem;
use std::ptr::NonNull;

use crate::{ShmError, ShmResult};

#[derive(Debug)]
enum Backing {
    Mapped(memmap2::MmapMut),
    Owned { layout: Layout },
}

/// Zero-initialised backing memory shared by the two channel parties.
///
/// We first try an anonymous `mmap` (page aligned, zero-filled by the
/// kernel). If the mapping fails or is not suitably aligned, we fall back to
/// a zeroed heap allocation honoring the requested alignment.
#[derive(Debug)]
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
    alignment: usize,
    backing: Backing,
}

// SAFETY: the region is a plain byte arena. Cross-thread access goes through the
// atomics in the control block or through raw copies that those atomics order.
unsafe impl Send for SharedRegion {}
// SAFETY: as above; the region never hands out overlapping `&mut` borrows.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocates a zeroed region of `len` bytes aligned to `alignment`.
    pub fn new_zeroed(len: usize, alignment: usize) -> ShmResult<Self> {
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(ShmError::AllocationFailed {
                size: len,
                alignment,
            });
        }

        match Self::mmap_backed(len, alignment) {
            Ok(Some(region)) => return Ok(region),
            Ok(None) => {
                log::debug!("anonymous mapping misaligned for {alignment}; using heap region");
            }
            Err(err) => {
                log::debug!("anonymous mapping failed ({err}); using heap region");
            }
        }

        Self::heap_backed(len, alignment)
    }

    fn mmap_backed(len: usize, alignment: usize) -> ShmResult<Option<Self>> {
        let mut map = memmap2::MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|_| ShmError::AllocationFailed {
                size: len,
                alignment,
            })?;

        let ptr = map.as_mut_ptr();
        if ptr as usize % alignment != 0 {
            return Ok(None);
        }
        let base = NonNull::new(ptr).ok_or(ShmError::AllocationFailed {
            size: len,
            alignment,
        })?;

        // Anonymous pages are zero-filled; moving the `MmapMut` does not move the mapping.
        Ok(Some(Self {
            base,
            len,
            alignment,
            backing: Backing::Mapped(map),
        }))
    }

    fn heap_backed(len: usize, alignment: usize) -> ShmResult<Self> {
        let layout =
            Layout::from_size_align(len, alignment).map_err(|_| ShmError::AllocationFailed {
                size: len,
                alignment,
            })?;

        // SAFETY: `layout` has a non-zero size, checked above.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(ShmError::AllocationFailed {
            size: len,
            alignment,
        })?;

        Ok(Self {
            base,
            len,
            alignment,
            backing: Backing::Owned { layout },
        })
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the alignment the region was allocated with.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns true when the region is backed by an anonymous mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Base address of the region.
    ///
    /// Writes through this pointer must follow the channel's ownership
    /// discipline; the region itself does not arbitrate between parties.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Borrows the start of the region as a `T`.
    ///
    /// # Safety
    /// `T` must be valid for the bytes currently stored at the start of the
    /// region (all-zero for a fresh region) and must only contain interior
    /// mutability, since the borrow is shared across threads.
    pub(crate) unsafe fn prefix<T>(&self) -> &T {
        assert!(mem::size_of::<T>() <= self.len, "region too small for prefix");
        assert!(
            mem::align_of::<T>() <= self.alignment,
            "region alignment too small for prefix"
        );
        // SAFETY: bounds and alignment are checked above; validity is on the caller.
        unsafe { &*(self.base.as_ptr() as *const T) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Owned { layout } = &self.backing {
            // SAFETY: `base` was returned by `alloc_zeroed` with this exact layout.
            unsafe {
                dealloc(self.base.as_ptr(), *layout);
            }
        }
    }
}
