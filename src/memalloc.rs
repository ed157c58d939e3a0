use std::ptr::{self, NonNull};

use crate::{
    block::{ALIGNMENT, Block, DSIZE, MIN_BLOCK_SIZE, adjusted_size},
    config::Config,
    error::HeapError,
    mmap::{HeapSource, MappedHeap},
    region::{PREAMBLE_SIZE, Region},
    utils::checked_align,
};

/// Segregated-fit allocator over one growable region.
///
/// Free blocks are kept in 16 explicit doubly linked lists, one per size class,
/// each sorted by size. The array of list heads is stored at the very start of
/// the heap, so everything the allocator knows lives inside the region it
/// manages and any number of independent heaps can coexist.
///
/// ```text
///                      free lists (sorted)
///   +---------------------------------+------------------+
///   |                                 |                  |
/// +-|---------+-----+-------+------+--|---+-------+------|-----+-----+
/// | directory | pro | Alloc | Free | Alloc | Free | Alloc | Free | epi |
/// +-----------+-----+-------+------+-------+------+-------+------+-----+
/// ```
///
/// `MemAlloc` is not thread safe and not reentrant. Wrap it in a lock (see
/// [`crate::LockedAlloc`]) or keep one instance per thread.
///
/// Pointers handed out by the allocator are only valid while it is alive:
/// dropping it drops the backing store too.
pub struct MemAlloc<S: HeapSource = MappedHeap> {
    /// Where the memory comes from.
    source: S,
    /// Memory granted by `source` so far.
    region: Region,
    config: Config,
}

// SAFETY: the region is owned by this value and only reachable through `&mut self`.
unsafe impl<S: HeapSource + Send> Send for MemAlloc<S> {}

impl MemAlloc<MappedHeap> {
    /// Builds a heap over a fresh [`MappedHeap`] with the default [`Config`].
    pub fn new() -> Result<Self, HeapError> {
        Self::init(MappedHeap::new()?, Config::default())
    }
}

impl<S: HeapSource> MemAlloc<S> {
    /// Sets up a heap over `source`: lays out the directory, the prologue and
    /// the epilogue, then grows the heap by [`Config::initial_size`] bytes.
    ///
    /// The first address `source` hands out must be aligned to [`ALIGNMENT`].
    pub fn init(mut source: S, config: Config) -> Result<Self, HeapError> {
        let base = source.grow(PREAMBLE_SIZE)?;
        if base.as_ptr() as usize % ALIGNMENT != 0 {
            return Err(HeapError::BadSource { reason: "heap base is not aligned" });
        }

        let mut region = Region::new(base, PREAMBLE_SIZE);
        region.format();

        let mut heap = Self { source, region, config };
        heap.extend_heap(config.initial_size())?;

        log::debug!("heap initialized at {base:p} with {} bytes", heap.region.len());
        heap.after_mutation("init");

        Ok(heap)
    }

    /// Allocates a block with room for at least `size` bytes.
    ///
    /// Returns `None` when `size` is zero or when the backing store cannot
    /// grow any more. The returned pointer is aligned to [`ALIGNMENT`].
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let Some(needed) = adjusted_size(size) else {
            log::warn!("allocate({size}) -> NULL, size overflows");
            return None;
        };

        let block = match self.region.find_fit(needed) {
            Some(block) => block,
            None => match self.extend_heap(needed.max(self.config.chunk_size())) {
                Ok(block) => block,
                Err(err) => {
                    log::warn!("allocate({size}) -> NULL, {err}");
                    return None;
                }
            },
        };

        self.place(block, needed);

        let ptr = self.region.payload(block);
        log::trace!("allocate({size}) -> {ptr:p} block={}", block.size(&self.region));
        self.after_mutation("allocate");

        Some(ptr)
    }

    /// Returns the block behind `ptr` to the heap, merging it with free neighbours.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`] or [`resize`] on this heap
    /// and must not have been freed since.
    ///
    /// [`allocate`]: MemAlloc::allocate
    /// [`resize`]: MemAlloc::resize
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let block = self.region.block_of(ptr);
        let size = block.size(&self.region);

        block.write_tags(&mut self.region, size, false);
        self.region.insert_free(block);
        let merged = self.region.coalesce(block);

        log::trace!(
            "free({ptr:p}) size={size} merged={}",
            merged.size(&self.region)
        );
        self.after_mutation("free");
    }

    /// Resizes the block behind `ptr` so it holds at least `size` bytes.
    ///
    /// The block never shrinks. When it has to grow, it grows in place if the
    /// following block is free and large enough, or if the block ends the heap
    /// (possibly followed by one free block) so the heap can be extended under
    /// it. Otherwise the payload moves to a new block and the old one is freed.
    /// The first `min(old, new)` bytes are preserved either way.
    ///
    /// Returns `None` for a zero `size` and when the heap is exhausted. In both
    /// cases the old block is left untouched and `ptr` stays valid.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemAlloc::free`].
    pub unsafe fn resize(&mut self, ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let Some(needed) = adjusted_size(size) else {
            log::warn!("resize({ptr:p}, {size}) -> NULL, size overflows");
            return None;
        };

        let block = self.region.block_of(ptr);
        let current = block.size(&self.region);

        if current >= needed {
            log::trace!("resize({ptr:p}, {size}) -> same block, {current} bytes already");
            return Some(ptr);
        }

        let epilogue = self.region.epilogue();
        let next = block.next(&self.region);
        let next_free = !next.is_allocated(&self.region);
        // Only a block at the end of the heap can be grown by extending it.
        let at_end = next == epilogue || (next_free && next.next(&self.region) == epilogue);
        let mut available = current + next.size(&self.region);

        if (next_free && available >= needed) || at_end {
            if available < needed {
                let shortfall = needed - available;
                if let Err(err) = self.extend_heap(shortfall.max(self.config.chunk_size())) {
                    log::warn!("resize({ptr:p}, {size}) -> NULL, {err}");
                    return None;
                }
                // The new space either replaced the epilogue or merged with `next`.
                available = current + block.next(&self.region).size(&self.region);
            }
            debug_assert!(available >= needed);

            let next = block.next(&self.region);
            self.region.remove_free(next);
            self.commit(block, available, needed);

            log::trace!("resize({ptr:p}, {size}) -> grew in place to {}", block.size(&self.region));
            self.after_mutation("resize");

            return Some(ptr);
        }

        let new_ptr = self.allocate(size)?;
        unsafe {
            // The new block is strictly larger, so the whole old payload fits.
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), current - DSIZE);
            self.free(ptr);
        }

        log::trace!("resize({ptr:p}, {size}) -> moved to {new_ptr:p}");

        Some(new_ptr)
    }

    /// Number of payload bytes the block behind `ptr` can hold. Always at
    /// least the size it was requested with.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.region.block_of(ptr).size(&self.region) - DSIZE
    }

    /// Whether `ptr` points inside the blocks area of this heap. This does not
    /// tell whether it is a live allocation.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.region.contains(ptr)
    }

    /// Bytes obtained from the backing store so far, bookkeeping included.
    pub fn heap_size(&self) -> usize {
        self.region.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    /// Grows the heap by `size` bytes (rounded to a double word) and turns the
    /// new space into a free block, merged with the previous block if that
    /// one is free. Returns the resulting free block.
    fn extend_heap(&mut self, size: usize) -> Result<Block, HeapError> {
        let size = checked_align(size, DSIZE)
            .ok_or(HeapError::Exhausted { requested: size, available: 0 })?;
        let old_end = self.source.grow(size)?;

        let expected = self.region.base().as_ptr() as usize + self.region.len();
        if old_end.as_ptr() as usize != expected {
            return Err(HeapError::BadSource { reason: "backing store is not contiguous" });
        }

        // The old epilogue header becomes the header of the new block.
        let block = self.region.grow(size);
        block.write_tags(&mut self.region, size, false);
        self.region.write_epilogue();
        self.region.insert_free(block);

        log::debug!("heap extended by {size} bytes to {}", self.region.len());

        Ok(self.region.coalesce(block))
    }

    /// Takes the free `block` out of its list and allocates its first `size` bytes.
    ///
    /// The allocation always sits at the front of the block and the remainder
    /// at the back. There is no size-dependent placement at the tail.
    fn place(&mut self, block: Block, size: usize) {
        let total = block.size(&self.region);
        debug_assert!(total >= size);

        self.region.remove_free(block);
        self.commit(block, total, size);
    }

    /// Marks `block`, which spans `total` bytes and is in no list, as allocated
    /// with `size` bytes. The rest becomes a new free block unless it would be
    /// smaller than [`MIN_BLOCK_SIZE`], in which case the whole span is allocated.
    fn commit(&mut self, block: Block, total: usize, size: usize) {
        let rest = total - size;

        if rest < MIN_BLOCK_SIZE {
            block.write_tags(&mut self.region, total, true);
            return;
        }

        block.write_tags(&mut self.region, size, true);

        // Whatever follows `total` is allocated, so the remainder has no free
        // neighbour to merge with.
        let remainder = block.next(&self.region);
        remainder.write_tags(&mut self.region, rest, false);
        self.region.insert_free(remainder);
    }

    #[inline]
    fn after_mutation(&self, operation: &'static str) {
        #[cfg(feature = "heap-check")]
        {
            if let Err(err) = self.check() {
                panic!("heap check failed after {operation}: {err}");
            }
        }

        #[cfg(not(feature = "heap-check"))]
        let _ = operation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::WSIZE;
    use crate::config::DEFAULT_CHUNK_SIZE;

    fn heap() -> MemAlloc {
        MemAlloc::init(MappedHeap::with_capacity(1 << 20).unwrap(), Config::default()).unwrap()
    }

    #[test]
    fn init_layout() {
        let heap = heap();
        assert_eq!(heap.heap_size(), PREAMBLE_SIZE + Config::default().initial_size());

        let stats = heap.check().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, Config::default().initial_size());
    }

    #[test]
    fn init_fails_when_store_is_too_small() {
        let source = MappedHeap::with_capacity(PREAMBLE_SIZE + 8).unwrap();
        let err = MemAlloc::init(source, Config::default()).err().unwrap();

        assert!(matches!(err, HeapError::Exhausted { .. }));
    }

    #[test]
    fn zero_sized_requests() {
        let mut heap = heap();
        assert_eq!(heap.allocate(0), None);

        let ptr = heap.allocate(8).unwrap();
        unsafe {
            assert_eq!(heap.resize(ptr, 0), None);
            // The block is still live.
            ptr.as_ptr().write(7);
            heap.free(ptr);
        }
        heap.check().unwrap();
    }

    #[test]
    fn basic_alloc() {
        let mut heap = heap();
        unsafe {
            let block = heap.allocate(4).unwrap().cast::<u32>();
            block.as_ptr().write(23);
            assert_eq!(23, *block.as_ptr());
            assert!(heap.usable_size(block.cast()) >= 4);
        }
    }

    #[test]
    fn space_for_free_block_is_used() {
        let mut heap = heap();
        unsafe {
            let a = heap.allocate(100).unwrap();
            let _b = heap.allocate(50).unwrap();

            heap.free(a);

            let c = heap.allocate(90).unwrap();
            assert_eq!(a, c);
        }
    }

    #[test]
    fn adjacent_frees_coalesce_without_extension() {
        let mut heap = heap();
        unsafe {
            let a = heap.allocate(16).unwrap();
            let b = heap.allocate(16).unwrap();
            assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, MIN_BLOCK_SIZE);

            heap.free(a);
            heap.free(b);

            let size = heap.heap_size();
            let c = heap.allocate(32).unwrap();
            assert_eq!(heap.heap_size(), size);
            assert_eq!(c, a);
        }
    }

    #[test]
    fn split_leaves_no_sliver() {
        let mut heap = heap();
        let initial = heap.config().initial_size();

        // A request whose block leaves less than a minimum block behind gets
        // the whole initial block.
        let ptr = heap.allocate(initial - DSIZE - WSIZE).unwrap();
        unsafe {
            assert_eq!(heap.usable_size(ptr), initial - DSIZE);
        }
        assert_eq!(heap.check().unwrap().free_blocks, 0);
    }

    #[test]
    fn large_request_extends_by_its_own_size() {
        let mut heap = heap();
        let before = heap.heap_size();

        let ptr = heap.allocate(4 * DEFAULT_CHUNK_SIZE).unwrap();
        assert!(heap.heap_size() >= before + 4 * DEFAULT_CHUNK_SIZE);
        unsafe {
            ptr.as_ptr().write_bytes(0xEE, 4 * DEFAULT_CHUNK_SIZE);
        }
        heap.check().unwrap();
    }

    #[test]
    fn resize_same_block_when_big_enough() {
        let mut heap = heap();
        unsafe {
            let ptr = heap.allocate(64).unwrap();
            assert_eq!(heap.resize(ptr, 10), Some(ptr));
            assert_eq!(heap.resize(ptr, 64), Some(ptr));
        }
    }

    #[test]
    fn resize_absorbs_free_successor() {
        let mut heap = heap();
        unsafe {
            let ptr = heap.allocate(16).unwrap();
            ptr.as_ptr().write_bytes(0x11, 16);

            // Everything after `ptr` is one free block.
            let grown = heap.resize(ptr, 64).unwrap();
            assert_eq!(grown, ptr);
            assert!(heap.usable_size(ptr) >= 64);
            for i in 0..16 {
                assert_eq!(*grown.as_ptr().add(i), 0x11);
            }
        }
        heap.check().unwrap();
    }

    #[test]
    fn resize_extends_over_epilogue() {
        let mut heap = heap();
        let initial = heap.config().initial_size();
        unsafe {
            // Takes the whole initial block, so the epilogue follows it.
            let ptr = heap.allocate(initial - DSIZE).unwrap();
            assert_eq!(heap.check().unwrap().free_blocks, 0);
            ptr.as_ptr().write_bytes(0x22, initial - DSIZE);

            let size = heap.heap_size();
            let grown = heap.resize(ptr, 1000).unwrap();
            assert_eq!(grown, ptr);
            assert!(heap.heap_size() > size);
            assert_eq!(*grown.as_ptr().add(initial - DSIZE - 1), 0x22);
        }
        heap.check().unwrap();
    }

    #[test]
    fn resize_moves_when_successor_is_allocated() {
        let mut heap = heap();
        unsafe {
            let a = heap.allocate(24).unwrap();
            let _b = heap.allocate(24).unwrap();
            for i in 0..24 {
                a.as_ptr().add(i).write(i as u8);
            }

            let moved = heap.resize(a, 200).unwrap();
            assert_ne!(moved, a);
            for i in 0..24 {
                assert_eq!(*moved.as_ptr().add(i), i as u8);
            }
        }
        heap.check().unwrap();
    }

    #[test]
    fn resize_moves_when_free_successor_is_too_small() {
        let mut heap = heap();
        unsafe {
            let a = heap.allocate(16).unwrap();
            let b = heap.allocate(16).unwrap();
            let _c = heap.allocate(16).unwrap();
            heap.free(b);
            a.as_ptr().write_bytes(0x44, 16);

            // `a` + `b` is far too small and `_c` keeps them from the end of the heap.
            let moved = heap.resize(a, 5000).unwrap();
            assert_ne!(moved, a);
            assert!(heap.usable_size(moved) >= 5000);
            for i in 0..16 {
                assert_eq!(*moved.as_ptr().add(i), 0x44);
            }

            let stats = heap.check().unwrap();
            assert!(stats.largest_free < heap.heap_size());
            moved.as_ptr().write_bytes(0x55, 5000);
        }
        heap.check().unwrap();
    }

    #[test]
    fn resize_absorbs_middle_successor_when_large_enough() {
        let mut heap = heap();
        unsafe {
            let a = heap.allocate(16).unwrap();
            let b = heap.allocate(64).unwrap();
            let _c = heap.allocate(16).unwrap();
            heap.free(b);

            let size = heap.heap_size();
            let grown = heap.resize(a, 64).unwrap();
            assert_eq!(grown, a);
            assert_eq!(heap.heap_size(), size);
        }
        heap.check().unwrap();
    }

    #[test]
    fn resize_extends_through_free_tail() {
        let mut heap = heap();
        unsafe {
            // The rest of the initial block stays free right before the epilogue.
            let a = heap.allocate(16).unwrap();
            a.as_ptr().write_bytes(0x66, 16);

            let size = heap.heap_size();
            let grown = heap.resize(a, 1000).unwrap();
            assert_eq!(grown, a);
            assert!(heap.heap_size() > size);
            assert!(heap.usable_size(a) >= 1000);
            assert_eq!(*grown.as_ptr().add(15), 0x66);
        }
        heap.check().unwrap();
    }

    #[test]
    fn huge_chunk_size_reports_exhaustion() {
        let config = Config::default().with_chunk_size(usize::MAX);
        let mut heap = MemAlloc::init(MappedHeap::with_capacity(1 << 20).unwrap(), config).unwrap();

        assert_eq!(heap.allocate(1000), None);
        assert!(heap.allocate(16).is_some());
        heap.check().unwrap();
    }

    /// Hands out a base one word past a double-word boundary.
    struct MisalignedSource(MappedHeap);

    impl HeapSource for MisalignedSource {
        fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError> {
            let start = self.0.grow(increment + WSIZE)?;
            Ok(unsafe { start.add(WSIZE) })
        }
    }

    /// Leaves a gap in front of every grant after the first one.
    struct GappySource {
        inner: MappedHeap,
        grants: usize,
    }

    impl HeapSource for GappySource {
        fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError> {
            if self.grants > 0 {
                self.inner.grow(DSIZE)?;
            }
            self.grants += 1;
            self.inner.grow(increment)
        }
    }

    #[test]
    fn unusable_sources_are_rejected() {
        let source = MisalignedSource(MappedHeap::with_capacity(1 << 16).unwrap());
        let err = MemAlloc::init(source, Config::default()).err().unwrap();
        assert_eq!(err, HeapError::BadSource { reason: "heap base is not aligned" });

        let source = GappySource { inner: MappedHeap::with_capacity(1 << 16).unwrap(), grants: 0 };
        let err = MemAlloc::init(source, Config::default()).err().unwrap();
        assert_eq!(err, HeapError::BadSource { reason: "backing store is not contiguous" });
    }

    #[test]
    fn exhaustion_returns_none_and_keeps_heap_usable() {
        let mut heap =
            MemAlloc::init(MappedHeap::with_capacity(16 * 1024).unwrap(), Config::default()).unwrap();

        assert_eq!(heap.allocate(1 << 20), None);
        assert_eq!(heap.allocate(usize::MAX), None);

        let ptr = heap.allocate(100).unwrap();
        unsafe {
            assert_eq!(heap.resize(ptr, 1 << 20), None);
            ptr.as_ptr().write_bytes(0x33, 100);
            heap.free(ptr);
        }
        heap.check().unwrap();
    }

    #[test]
    fn owns_pointers_of_its_region_only() {
        let mut heap = heap();
        let ptr = heap.allocate(8).unwrap();
        assert!(heap.owns(ptr));

        let mut local = 0u8;
        assert!(!heap.owns(NonNull::from(&mut local)));
    }
}
