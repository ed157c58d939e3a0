use crate::{
    block::{Block, WSIZE},
    region::Region,
};

/// Free-list links are offsets from the heap base. Offset zero is the padding
/// word at the very start of the heap, which can never be a payload, so it
/// doubles as the null link.
const NIL: usize = 0;

#[inline]
fn decode(raw: usize) -> Option<Block> {
    (raw != NIL).then(|| Block::from_offset(raw))
}

#[inline]
fn encode(link: Option<Block>) -> usize {
    link.map_or(NIL, Block::offset)
}

/// The two link words a free block keeps at the start of its payload.
///
/// ```text
/// +------------------------+
/// |         header         |
/// +------------------------+ <- payload
/// |   pred: Option<Block>  |
/// +------------------------+
/// |   succ: Option<Block>  |
/// +------------------------+
/// |    (unused payload)    |
/// +------------------------+
/// |         footer         |
/// +------------------------+
/// ```
///
/// They are only meaningful while the block is free; once the block is
/// allocated the caller's data overwrites them.
impl Block {
    #[inline]
    pub fn pred(self, region: &Region) -> Option<Block> {
        decode(region.get(self.offset()))
    }

    #[inline]
    pub fn succ(self, region: &Region) -> Option<Block> {
        decode(region.get(self.offset() + WSIZE))
    }

    #[inline]
    pub fn set_pred(self, region: &mut Region, pred: Option<Block>) {
        region.put(self.offset(), encode(pred));
    }

    #[inline]
    pub fn set_succ(self, region: &mut Region, succ: Option<Block>) {
        region.put(self.offset() + WSIZE, encode(succ));
    }
}

/// Explicit doubly linked list of the free blocks of one size class, kept in
/// ascending size order. The head pointer lives in the directory slot of the
/// class, inside the heap itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    class: usize,
}

pub(crate) struct Iter<'a> {
    region: &'a Region,
    current: Option<Block>,
}

impl FreeList {
    #[inline]
    pub const fn new(class: usize) -> Self {
        Self { class }
    }

    /// Offset of the directory word holding the head of this list. Word zero
    /// is padding, so the directory starts at the second word.
    #[inline]
    const fn slot(&self) -> usize {
        (self.class + 1) * WSIZE
    }

    #[inline]
    pub fn head(&self, region: &Region) -> Option<Block> {
        decode(region.get(self.slot()))
    }

    #[inline]
    fn set_head(&self, region: &mut Region, head: Option<Block>) {
        region.put(self.slot(), encode(head));
    }

    /// Links `block` right before the first node that is at least as large,
    /// or at the tail if there is none.
    pub fn insert_sorted(&self, region: &mut Region, block: Block) {
        let size = block.size(region);

        let mut prev = None;
        let mut current = self.head(region);

        while let Some(node) = current {
            if node.size(region) >= size {
                break;
            }
            prev = current;
            current = node.succ(region);
        }

        block.set_pred(region, prev);
        block.set_succ(region, current);

        match prev {
            Some(prev) => prev.set_succ(region, Some(block)),
            None => self.set_head(region, Some(block)),
        }

        if let Some(next) = current {
            next.set_pred(region, Some(block));
        }
    }

    /// Unlinks `block`, which must be a member of this list.
    pub fn remove(&self, region: &mut Region, block: Block) {
        let pred = block.pred(region);
        let succ = block.succ(region);

        match pred {
            Some(pred) => pred.set_succ(region, succ),
            None => {
                debug_assert_eq!(self.head(region), Some(block));
                self.set_head(region, succ);
            }
        }

        if let Some(succ) = succ {
            succ.set_pred(region, pred);
        }
    }

    pub fn iter<'a>(&self, region: &'a Region) -> Iter<'a> {
        Iter { region, current: self.head(region) }
    }
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        self.current = block.succ(self.region);

        Some(block)
    }
}
