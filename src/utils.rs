//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This is used to round block sizes up to a multiple of [`crate::block::DSIZE`]
/// and to round the reservation of a [`crate::MappedHeap`] up to the page size.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around on huge inputs.
#[inline]
pub const fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(aligment - 1) {
        Some(value) => Some(value & !(aligment - 1)),
        None => None,
    }
}
