//! Heap consistency checker.
//!
//! Walks the block chain and every free list and reports the first broken
//! invariant it finds. It is slow, linear in the number of blocks, and meant
//! for tests and for the `heap-check` feature.

use crate::{
    block::{ALIGNMENT, Block, BlockState, DSIZE, MIN_BLOCK_SIZE},
    error::HeapError,
    freelist::class_of,
    memalloc::MemAlloc,
    mmap::HeapSource,
    region::{PROLOGUE, Region},
};

/// Summary of the heap produced by a successful [`MemAlloc::check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Blocks between the prologue and the epilogue.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Bytes in free blocks, tags included.
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Bytes obtained from the backing store.
    pub heap_size: usize,
}

impl<S: HeapSource> MemAlloc<S> {
    /// Verifies every structural invariant of the heap:
    ///
    /// - prologue and epilogue are intact and the epilogue ends the region;
    /// - every block is aligned, at least [`MIN_BLOCK_SIZE`] and has matching tags;
    /// - no two free blocks are adjacent;
    /// - every free list is well linked, sorted, holds only free blocks of
    ///   its own class, and together the lists hold every free block exactly once.
    pub fn check(&self) -> Result<HeapStats, HeapError> {
        check_region(self.region())
    }
}

fn corrupted(offset: usize, reason: &'static str) -> HeapError {
    HeapError::Corrupted { offset, reason }
}

pub(crate) fn check_region(region: &Region) -> Result<HeapStats, HeapError> {
    let mut stats = HeapStats { heap_size: region.len(), ..HeapStats::default() };

    if PROLOGUE.size(region) != DSIZE
        || !PROLOGUE.is_allocated(region)
        || region.get(PROLOGUE.header()) != region.get(PROLOGUE.footer(region))
    {
        return Err(corrupted(PROLOGUE.header(), "bad prologue"));
    }

    let mut block = PROLOGUE.next(region);
    let mut prev_free = false;

    loop {
        if block.offset() > region.len() {
            return Err(corrupted(block.header(), "block runs past the end of the heap"));
        }

        let size = block.size(region);
        if size == 0 {
            break;
        }

        if block.offset() % ALIGNMENT != 0 {
            return Err(corrupted(block.offset(), "payload is not aligned"));
        }
        if size < MIN_BLOCK_SIZE || size % DSIZE != 0 {
            return Err(corrupted(block.header(), "invalid block size"));
        }
        if block.offset().checked_add(size).is_none_or(|end| end > region.len()) {
            return Err(corrupted(block.header(), "block runs past the end of the heap"));
        }
        if region.get(block.header()) != region.get(block.footer(region)) {
            return Err(corrupted(block.header(), "header and footer differ"));
        }

        let free = !block.is_allocated(region);
        if free && prev_free {
            return Err(corrupted(block.header(), "two adjacent free blocks"));
        }
        if free {
            stats.free_blocks += 1;
            stats.free_bytes += size;
            stats.largest_free = stats.largest_free.max(size);
        }

        stats.blocks += 1;
        prev_free = free;
        block = block.next(region);
    }

    if block != region.epilogue() || !block.is_allocated(region) {
        return Err(corrupted(block.header(), "epilogue is not at the end of the heap"));
    }

    let mut listed = 0;
    for (class, list) in region.free_lists() {
        let mut pred: Option<Block> = None;
        let mut last_size = 0;
        let mut current = list.head(region);

        // Links are validated before they are followed, so no iterator here.
        while let Some(node) = current {
            listed += 1;
            if listed > stats.free_blocks {
                return Err(corrupted(node.offset(), "free lists hold more blocks than the heap"));
            }

            let offset = node.offset();
            if offset <= PROLOGUE.offset() || offset >= region.len() || offset % ALIGNMENT != 0 {
                return Err(corrupted(offset, "free list link points outside the heap"));
            }
            let BlockState::Free { pred: linked_pred, succ } = node.state(region) else {
                return Err(corrupted(offset, "allocated block in a free list"));
            };

            let size = node.size(region);
            if size < MIN_BLOCK_SIZE {
                return Err(corrupted(offset, "invalid block size"));
            }
            if class_of(size) != class {
                return Err(corrupted(offset, "free block in the wrong size class"));
            }
            if size < last_size {
                return Err(corrupted(offset, "free list is not sorted"));
            }
            if linked_pred != pred {
                return Err(corrupted(offset, "broken predecessor link"));
            }

            pred = Some(node);
            last_size = size;
            current = succ;
        }
    }

    if listed != stats.free_blocks {
        return Err(corrupted(0, "free block missing from the free lists"));
    }

    Ok(stats)
}
