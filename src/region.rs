use std::ptr::NonNull;

use crate::{
    block::{Block, DSIZE, Tag, WSIZE},
    freelist::LIST_COUNT,
};

/// Bytes the heap needs before the first real block: one padding word, the
/// free-list directory, the prologue header and footer and the epilogue header.
pub(crate) const PREAMBLE_SIZE: usize = (LIST_COUNT + 4) * WSIZE;

/// The prologue is an allocated block without payload. It sits right after the
/// directory and stops backward coalescing from ever leaving the heap.
pub(crate) const PROLOGUE: Block = Block::from_offset((LIST_COUNT + 2) * WSIZE);

/// The contiguous memory the allocator manages, described by its base address
/// and the number of bytes the backing store has granted so far.
///
/// Everything lives inside it, including the array of free-list heads:
///
/// ```text
/// +-----+----------------------+----------+-----------+-------+-----+-------+----------+
/// | pad | directory (16 words) | pro hdr  |  pro ftr  | block | ... | block | epilogue |
/// +-----+----------------------+----------+-----------+-------+-----+-------+----------+
/// ^                                                                                    ^
/// base                                                                      base + len
/// ```
///
/// The epilogue header is always the last word of the region. It is a zero
/// sized allocated block, so forward traversal and forward coalescing stop there.
/// Growing the heap turns the old epilogue word into the header of the new block.
pub(crate) struct Region {
    /// Start of the region, as returned by the first grow of the backing store.
    base: NonNull<u8>,
    /// Bytes granted so far.
    len: usize,
}

impl Region {
    pub(crate) fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Builds a region over a word buffer, for tests of the block level code.
    #[cfg(test)]
    pub(crate) fn from_words(words: &mut [usize]) -> Self {
        let len = words.len() * WSIZE;
        Self::new(NonNull::from(words).cast(), len)
    }

    #[inline]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Reads the word at `offset`.
    #[inline]
    pub(crate) fn get(&self, offset: usize) -> usize {
        debug_assert!(offset % WSIZE == 0 && offset + WSIZE <= self.len);
        // SAFETY: offsets come from block arithmetic over tags we wrote
        // ourselves, so they are word aligned and inside the granted region.
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().read() }
    }

    /// Writes `value` to the word at `offset`.
    #[inline]
    pub(crate) fn put(&mut self, offset: usize, value: usize) {
        debug_assert!(offset % WSIZE == 0 && offset + WSIZE <= self.len);
        // SAFETY: see `get`.
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().write(value) }
    }

    /// Pointer to the payload of `block`.
    #[inline]
    pub(crate) fn payload(&self, block: Block) -> NonNull<u8> {
        // SAFETY: block offsets never exceed `len`, which the backing store granted.
        unsafe { self.base.add(block.offset()) }
    }

    /// Block whose payload starts at `ptr`. The pointer must come from [`Region::payload`].
    #[inline]
    pub(crate) fn block_of(&self, ptr: NonNull<u8>) -> Block {
        let offset = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        debug_assert!(offset > PROLOGUE.offset() && offset < self.len);

        Block::from_offset(offset)
    }

    /// Whether `ptr` points somewhere after the prologue and before the epilogue.
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;

        addr > base + PROLOGUE.offset() && addr < base + self.len
    }

    /// Zeroes the directory and writes the prologue and the epilogue. The region
    /// must be exactly [`PREAMBLE_SIZE`] bytes long.
    pub(crate) fn format(&mut self) {
        debug_assert_eq!(self.len, PREAMBLE_SIZE);

        // Padding word plus every list head.
        for word in 0..=LIST_COUNT {
            self.put(word * WSIZE, 0);
        }

        PROLOGUE.write_tags(self, DSIZE, true);
        self.write_epilogue();
    }

    /// The epilogue pseudo block. Its header is the last word of the region.
    #[inline]
    pub(crate) fn epilogue(&self) -> Block {
        Block::from_offset(self.len)
    }

    #[inline]
    pub(crate) fn write_epilogue(&mut self) {
        self.put(self.len - WSIZE, Tag::new(0, true).raw());
    }

    /// Accounts for `increment` more bytes handed out by the backing store.
    /// Returns the block that starts where the old epilogue was.
    pub(crate) fn grow(&mut self, increment: usize) -> Block {
        let block = self.epilogue();
        self.len += increment;

        block
    }

    /// Merges the free `block` with its free physical neighbours.
    ///
    /// `block` must already be marked free and sit in the directory. Every block
    /// that takes part in a merge is taken out of its list before the tags are
    /// rewritten, and the resulting block goes back in once with its new size.
    /// Returns the block that now contains `block`.
    pub(crate) fn coalesce(&mut self, block: Block) -> Block {
        let prev = block.prev(self);
        let next = block.next(self);
        let prev_allocated = prev.is_allocated(self);
        let next_allocated = next.is_allocated(self);
        let mut size = block.size(self);

        let merged = match (prev_allocated, next_allocated) {
            (true, true) => return block,
            (true, false) => {
                self.remove_free(block);
                self.remove_free(next);
                size += next.size(self);
                block
            }
            (false, true) => {
                self.remove_free(block);
                self.remove_free(prev);
                size += prev.size(self);
                prev
            }
            (false, false) => {
                self.remove_free(block);
                self.remove_free(prev);
                self.remove_free(next);
                size += prev.size(self) + next.size(self);
                prev
            }
        };

        merged.write_tags(self, size, false);
        self.insert_free(merged);

        merged
    }
}
