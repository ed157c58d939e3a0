use std::ptr::NonNull;

use crate::{
    error::HeapError,
    kernel::{self, page_size},
    utils::checked_align,
};

/// Address space reserved by [`MappedHeap::new`].
pub const DEFAULT_CAPACITY: usize = 64 << 20;

/// The memory the allocator carves blocks from.
///
/// A source hands out one contiguous region that only ever grows, the same
/// contract `sbrk` offers a process. The first successful [`grow`] fixes the
/// start of the region and every later call returns the previous end, which is
/// also where the newly granted bytes begin.
///
/// [`grow`]: HeapSource::grow
pub trait HeapSource {
    /// Extends the region by `increment` bytes and returns the previous end.
    ///
    /// On failure the region is left untouched.
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError>;
}

/// A [`HeapSource`] that reserves a fixed amount of address space up front
/// and moves a break pointer through it.
///
/// ```text
/// +--------------------------------+--------------------------------+
/// |        granted to the heap     |         reserved, unused       |
/// +--------------------------------+--------------------------------+
/// ^                                ^                                ^
/// start                          brk                      start + capacity
/// ```
///
/// Pages are mapped lazily by the kernel, so a large reservation only costs
/// address space until the heap actually touches it. Dropping the source
/// returns the whole reservation, so it must outlive every pointer the
/// allocator gave out.
pub struct MappedHeap {
    /// Start of the reservation. Page aligned.
    start: NonNull<u8>,
    /// Bytes granted so far.
    brk: usize,
    /// Bytes that may be granted in total.
    capacity: usize,
    /// Bytes actually reserved, `capacity` rounded up to the page size.
    reserved: usize,
}

// SAFETY: the reservation is owned by this value alone.
unsafe impl Send for MappedHeap {}

impl MappedHeap {
    /// Reserves [`DEFAULT_CAPACITY`] bytes.
    pub fn new() -> Result<Self, HeapError> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Reserves room for a heap that never grows beyond `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self, HeapError> {
        let reserved = checked_align(capacity.max(1), page_size())
            .ok_or(HeapError::MapFailed { len: capacity })?;

        let start = unsafe { kernel::request_memory(reserved) }
            .ok_or(HeapError::MapFailed { len: reserved })?;

        log::debug!("reserved {reserved} bytes at {start:p} for a heap of {capacity} bytes");

        Ok(Self { start, brk: 0, capacity, reserved })
    }

    /// Bytes granted so far.
    pub fn len(&self) -> usize {
        self.brk
    }

    pub fn is_empty(&self) -> bool {
        self.brk == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl HeapSource for MappedHeap {
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError> {
        let available = self.capacity - self.brk;
        if increment > available {
            return Err(HeapError::Exhausted { requested: increment, available });
        }

        // SAFETY: `brk <= capacity <= reserved`, so the result stays inside
        // (or one past) the reservation.
        let old_end = unsafe { self.start.add(self.brk) };
        self.brk += increment;

        Ok(old_end)
    }
}

impl Drop for MappedHeap {
    fn drop(&mut self) {
        unsafe { kernel::return_memory(self.start, self.reserved) }
    }
}
