//! Control block plus data block: the single-slot handoff arena.
//!
//! The region is split into a [`META_BLOCK`]-byte header holding the
//! [`ControlWords`] and a data block of `capacity` bytes. The channel itself
//! never decides who may touch the data block; the byte-level accessors are
//! `unsafe` and callers uphold the status discipline:
//!
//! * the producer owns the data block while STATUS is READY, and owns bytes at
//!   or beyond the published POS at all times;
//! * the drainer reads `[0, POS)` only between observing WRITE and leaving
//!   WRITING (or between sync-flush rendezvous points).

use std::ops::Range;
use std::ptr;

use crate::control::{ControlWords, META_BLOCK};
use crate::region::SharedRegion;
use crate::{ShmError, ShmResult};

/// Largest data block addressable by the 32-bit POS word.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

/// Shared arena used by exactly one producer and one drainer.
#[derive(Debug)]
pub struct HandoffChannel {
    region: SharedRegion,
    capacity: usize,
}

impl HandoffChannel {
    /// Allocates a channel whose data block holds `capacity` bytes.
    pub fn new(capacity: usize) -> ShmResult<Self> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(ShmError::InvalidCapacity {
                requested: capacity,
                maximum: MAX_CAPACITY,
            });
        }
        let total = META_BLOCK
            .checked_add(capacity)
            .ok_or(ShmError::InvalidCapacity {
                requested: capacity,
                maximum: MAX_CAPACITY,
            })?;
        let region = SharedRegion::new_zeroed(total, META_BLOCK)?;
        let channel = Self { region, capacity };
        channel.control().reset();
        Ok(channel)
    }

    /// Size of the data block in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the backing memory is an anonymous mapping.
    pub fn is_mapped(&self) -> bool {
        self.region.is_mapped()
    }

    pub fn control(&self) -> &ControlWords {
        // SAFETY: the region is zero-initialised and 64-byte aligned, `ControlWords`
        // is all atomics/integers, and `new` resets it before the channel is shared.
        unsafe { self.region.prefix::<ControlWords>() }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the region is `META_BLOCK + capacity` bytes long.
        unsafe { self.region.as_ptr().add(META_BLOCK) }
    }

    /// Copies `bytes` into the data block at `offset`.
    ///
    /// # Safety
    /// The caller must own `[offset, offset + bytes.len())` under the status
    /// discipline; the other party must not be reading that range.
    pub unsafe fn write_at(&self, offset: usize, bytes: &[u8]) {
        let end = offset
            .checked_add(bytes.len())
            .expect("data block write overflow");
        assert!(end <= self.capacity, "write past end of data block");
        if bytes.is_empty() {
            return;
        }
        // SAFETY: bounds checked above; `bytes` cannot alias the shared region
        // because callers only hold owned buffers.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr().add(offset), bytes.len());
        }
    }

    /// Copies `range` of the data block into an owned chunk.
    ///
    /// # Safety
    /// The range must be published to the caller and not concurrently written.
    pub unsafe fn copy_out(&self, range: Range<usize>) -> Vec<u8> {
        assert!(range.start <= range.end, "inverted data block range");
        assert!(range.end <= self.capacity, "read past end of data block");
        let len = range.end - range.start;
        let mut chunk = Vec::with_capacity(len);
        // SAFETY: bounds checked above; `chunk` has room for `len` bytes.
        unsafe {
            ptr::copy_nonoverlapping(self.data_ptr().add(range.start), chunk.as_mut_ptr(), len);
            chunk.set_len(len);
        }
        chunk
    }

    /// Moves `[from, end)` down to the start of the data block.
    ///
    /// # Safety
    /// The caller must own the whole `[0, end)` range.
    pub unsafe fn shift_to_front(&self, from: usize, end: usize) {
        assert!(from <= end && end <= self.capacity, "invalid shift range");
        if from == 0 || from == end {
            return;
        }
        // SAFETY: both ranges lie inside the data block; `ptr::copy` handles overlap.
        unsafe {
            ptr::copy(self.data_ptr().add(from), self.data_ptr(), end - from);
        }
    }
}
