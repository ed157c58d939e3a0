//! # segalloc - a segregated-fit memory allocator
//!
//! This crate implements `allocate`, `free` and `resize` directly over one
//! contiguous, growable region of raw memory. No other allocator is involved:
//! the region comes from a [`HeapSource`] which, like `sbrk`, can only hand out
//! more bytes at the end of what it already gave.
//!
//! ## Overview
//!
//! ```text
//!   Heap layout:
//!
//!   +-----+-----------+-----+-------+------+-------+------+-----+
//!   | pad | directory | pro | Alloc | Free | Alloc | Free | epi |
//!   +-----+-----------+-----+-------+------+-------+------+-----+
//!         |                            ^              ^
//!         |    16 sorted free lists    |              |
//!         +----------------------------+--------------+
//! ```
//!
//! - Every block carries a header and a footer tag with its size and an
//!   allocated bit, so both neighbours of a block are found in constant time.
//! - Free blocks are threaded through explicit doubly linked lists, one per
//!   power of two size class. The list heads (the directory) live at the start
//!   of the heap itself.
//! - Lists are sorted by size, so the first fit in a class is its best fit.
//! - Freed blocks are merged with free neighbours immediately, and so is the
//!   new space every time the heap grows.
//! - Blocks are split when the leftover can still form a block of its own.
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::MemAlloc;
//!
//! let mut heap = MemAlloc::new().unwrap();
//!
//! let ptr = heap.allocate(100).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!
//!     let ptr = heap.resize(ptr, 400).unwrap();
//!     assert_eq!(*ptr.as_ptr().add(99), 0xAB);
//!
//!     heap.free(ptr);
//! }
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── block     - boundary tags and block address arithmetic
//!   ├── list      - one sorted, explicit free list
//!   ├── freelist  - size classes and the directory of lists
//!   ├── region    - heap layout, word access and coalescing
//!   ├── memalloc  - MemAlloc: init, allocate, free, resize
//!   ├── check     - heap consistency checker
//!   ├── mmap      - HeapSource trait and the mmap backed MappedHeap
//!   ├── kernel    - platform memory syscalls
//!   ├── global    - LockedAlloc, a GlobalAlloc adapter
//!   ├── config    - tuning knobs
//!   └── error     - HeapError
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: [`MemAlloc`] has no locking. [`LockedAlloc`] wraps it
//!   in a spin lock for global use.
//! - **No shrinking**: the heap never returns memory to its source and
//!   [`MemAlloc::resize`] never shrinks a block.
//! - **Caller contracts are not checked**: freeing a foreign pointer or freeing
//!   twice is undefined behaviour. Enable the `heap-check` feature to run the
//!   consistency checker after every operation while debugging.

mod block;
mod check;
mod config;
mod error;
mod freelist;
mod global;
mod kernel;
mod list;
mod memalloc;
mod mmap;
mod region;
mod utils;

pub use block::ALIGNMENT;
pub use check::HeapStats;
pub use config::{Config, DEFAULT_CHUNK_SIZE, DEFAULT_INITIAL_SIZE};
pub use error::HeapError;
pub use global::LockedAlloc;
pub use memalloc::MemAlloc;
pub use mmap::{DEFAULT_CAPACITY, HeapSource, MappedHeap};
