use std::mem;

use crate::region::Region;

/// Size of a word. Headers, footers and free-list links are one word each.
pub(crate) const WSIZE: usize = mem::size_of::<usize>();

/// Size of a double word. Every block size is a multiple of this.
pub(crate) const DSIZE: usize = 2 * WSIZE;

/// Smallest block we ever create: header, footer and room for the two
/// free-list links. Allocated blocks also respect it because any block can be
/// freed later and turned into a list node.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Alignment of every payload pointer handed out by the allocator.
pub const ALIGNMENT: usize = DSIZE;

/// Low bit of a tag, set when the block is allocated.
const ALLOCATED_BIT: usize = 0x1;

/// The three low bits of a tag never belong to the size.
const FLAGS_MASK: usize = 0x7;

/// One boundary tag: the size of a block and its allocated flag packed in a
/// single word. Headers and footers hold the same tag.
///
/// ```text
///  63                                   3   2   1   0
/// +---------------------------------------+---+---+---+
/// |             block size                | 0 | 0 | a |
/// +---------------------------------------+---+---+---+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(usize);

impl Tag {
    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size & FLAGS_MASK == 0);
        Self(size | allocated as usize)
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & !FLAGS_MASK
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }
}

/// Handle to a block inside a [`Region`]. It stores the offset of the payload
/// from the heap base, so it stays valid no matter where the region is mapped.
///
/// Every block is laid out like this:
///
/// ```text
/// +---------------------+ <------+
/// |   header (tag)      |        | -> one word
/// +---------------------+ <------+ <- Block offset points here
/// |   pred (if free)    |        |
/// +---------------------+        |
/// |   succ (if free)    |        | -> payload
/// |        ...          |        |
/// |        ...          |        |
/// +---------------------+ <------+
/// |   footer (tag)      |        | -> one word, copy of the header
/// +---------------------+ <------+
/// ```
///
/// The footer lets us find the previous block in constant time: the word
/// right before our header is the footer of the block that precedes us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(usize);

/// Decoded view of a block. The link words of a free block share storage with
/// the payload of an allocated one, so only one variant is ever meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free { pred: Option<Block>, succ: Option<Block> },
    Allocated,
}

impl Block {
    #[inline]
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Offset of the header word.
    #[inline]
    pub const fn header(self) -> usize {
        self.0 - WSIZE
    }

    #[inline]
    pub fn tag(self, region: &Region) -> Tag {
        Tag::from_raw(region.get(self.header()))
    }

    #[inline]
    pub fn size(self, region: &Region) -> usize {
        self.tag(region).size()
    }

    #[inline]
    pub fn is_allocated(self, region: &Region) -> bool {
        self.tag(region).is_allocated()
    }

    /// Offset of the footer word. Must not be called on the epilogue.
    #[inline]
    pub fn footer(self, region: &Region) -> usize {
        self.0 + self.size(region) - DSIZE
    }

    /// Block that physically follows this one.
    #[inline]
    pub fn next(self, region: &Region) -> Block {
        Block(self.0 + self.size(region))
    }

    /// Block that physically precedes this one, found through its footer.
    #[inline]
    pub fn prev(self, region: &Region) -> Block {
        let prev_size = Tag::from_raw(region.get(self.0 - DSIZE)).size();
        Block(self.0 - prev_size)
    }

    /// Writes the same tag to the header and to the footer of a block of `size` bytes.
    #[inline]
    pub fn write_tags(self, region: &mut Region, size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);
        region.put(self.header(), tag.raw());
        region.put(self.0 + size - DSIZE, tag.raw());
    }

    pub fn state(self, region: &Region) -> BlockState {
        if self.is_allocated(region) {
            BlockState::Allocated
        } else {
            BlockState::Free { pred: self.pred(region), succ: self.succ(region) }
        }
    }
}

/// Block size needed to serve a request of `size` payload bytes: payload plus
/// header and footer, rounded to [`DSIZE`] and never below [`MIN_BLOCK_SIZE`].
/// Returns `None` if the computation overflows.
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
    let with_tags = size.checked_add(DSIZE)?;
    let aligned = crate::utils::checked_align(with_tags, DSIZE)?;

    Some(aligned.max(MIN_BLOCK_SIZE))
}
