use crate::{
    block::{DSIZE, MIN_BLOCK_SIZE},
    utils::checked_align,
};

/// Bytes the heap grows by right after it is set up.
pub const DEFAULT_INITIAL_SIZE: usize = (1 << 7) + DSIZE;

/// Bytes the heap grows by when no free block fits a request.
pub const DEFAULT_CHUNK_SIZE: usize = (1 << 12) + DSIZE;

/// Tuning knobs of a [`crate::MemAlloc`].
///
/// ```
/// use segalloc::Config;
///
/// let config = Config::default().with_chunk_size(64 * 1024);
/// assert_eq!(config.chunk_size(), 64 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    initial_size: usize,
    chunk_size: usize,
}

impl Config {
    pub const fn new() -> Self {
        Self { initial_size: DEFAULT_INITIAL_SIZE, chunk_size: DEFAULT_CHUNK_SIZE }
    }

    /// Size of the free block created when the heap is set up. Rounded up to
    /// a valid block size.
    pub const fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = block_size(size);
        self
    }

    /// Minimum amount the heap grows by when it runs out of free blocks.
    /// Rounded up to a valid block size.
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = block_size(size);
        self
    }

    pub const fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds `size` up to a multiple of [`DSIZE`], at least [`MIN_BLOCK_SIZE`].
/// Sizes too large to round up get the largest multiple instead.
const fn block_size(size: usize) -> usize {
    let size = match checked_align(size, DSIZE) {
        Some(size) => size,
        None => usize::MAX & !(DSIZE - 1),
    };
    if size < MIN_BLOCK_SIZE { MIN_BLOCK_SIZE } else { size }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.initial_size(), 128 + DSIZE);
        assert_eq!(config.chunk_size(), 4096 + DSIZE);
    }

    #[test]
    fn sizes_are_normalised() {
        let config = Config::new().with_initial_size(1).with_chunk_size(1000);
        assert_eq!(config.initial_size(), MIN_BLOCK_SIZE);
        assert_eq!(config.chunk_size(), crate::utils::align(1000, DSIZE));
    }

    #[test]
    fn huge_sizes_do_not_overflow() {
        let config = Config::new().with_chunk_size(usize::MAX);
        assert_eq!(config.chunk_size() % DSIZE, 0);
        assert!(config.chunk_size() > usize::MAX - DSIZE);
    }
}
