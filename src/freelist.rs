use crate::{
    block::{Block, MIN_BLOCK_SIZE},
    list::FreeList,
    region::Region,
};

/// Number of size classes in the directory.
pub(crate) const LIST_COUNT: usize = 16;

const MIN_SHIFT: u32 = MIN_BLOCK_SIZE.trailing_zeros();

/// Size class a block of `size` bytes belongs to.
///
/// Classes are powers of two starting at [`MIN_BLOCK_SIZE`]: class `k` holds
/// sizes in `[MIN << k, MIN << (k + 1))` and the last class takes everything
/// above. Because the boundaries are exact, any block of a class higher than the
/// class of a request is large enough to serve it.
///
/// ```text
///  class:   0        1        2              14             15
///        [32,64) [64,128) [128,256)  ...  [2^19,2^20)   [2^20, ..)
/// ```
/// (sizes shown for 64 bit targets)
#[inline]
pub(crate) fn class_of(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK_SIZE);
    let log2 = usize::BITS - 1 - size.leading_zeros();

    ((log2 - MIN_SHIFT) as usize).min(LIST_COUNT - 1)
}

/// The segregated directory: one sorted [`FreeList`] per size class, with the
/// heads stored in the first words of the heap.
///
/// ```text
///   directory                 free blocks, ascending size
/// +-----------+
/// | class 0   | -> [32] <-> [32] <-> [48]
/// +-----------+
/// | class 1   | -> (empty)
/// +-----------+
/// | class 2   | -> [144] <-> [240]
/// +-----------+
/// |    ...    |
/// +-----------+
/// | class 15  | -> [1 MiB]
/// +-----------+
/// ```
///
/// Keeping every list sorted makes the first fit inside a class also the best
/// fit inside that class.
impl Region {
    #[inline]
    pub(crate) fn head(&self, class: usize) -> Option<Block> {
        FreeList::new(class).head(self)
    }

    /// Inserts a free block into the list of its size class.
    pub(crate) fn insert_free(&mut self, block: Block) {
        let class = class_of(block.size(self));
        FreeList::new(class).insert_sorted(self, block);
    }

    /// Takes a free block out of the list of its size class. Its tags must
    /// still hold the size it was inserted with.
    pub(crate) fn remove_free(&mut self, block: Block) {
        let class = class_of(block.size(self));
        FreeList::new(class).remove(self, block);
    }

    /// Returns the smallest block of the request's own class that can hold
    /// `size` bytes, or else the head of the first non empty larger class.
    /// `None` means the heap has to grow.
    pub(crate) fn find_fit(&self, size: usize) -> Option<Block> {
        let class = class_of(size);

        let own = FreeList::new(class)
            .iter(self)
            .find(|block| block.size(self) >= size);

        if own.is_some() {
            return own;
        }

        ((class + 1)..LIST_COUNT)
            .filter_map(|class| self.head(class))
            .find(|head| head.size(self) >= size)
    }

    /// Iterates over every free list in class order.
    pub(crate) fn free_lists(&self) -> impl Iterator<Item = (usize, FreeList)> {
        (0..LIST_COUNT).map(|class| (class, FreeList::new(class)))
    }
}
