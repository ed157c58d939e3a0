use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{
    block::ALIGNMENT, check::HeapStats, error::HeapError, memalloc::MemAlloc, mmap::MappedHeap,
};

/// A [`MemAlloc`] behind a spin lock, usable as the global allocator.
///
/// The heap itself is single threaded, so every call goes through the lock.
/// The heap is created on the first allocation; if that fails every
/// allocation returns null.
///
/// ```no_run
/// use segalloc::LockedAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: LockedAlloc = LockedAlloc::new();
/// ```
///
/// Do not combine it with a logger that allocates while the `trace` level is
/// enabled: the allocator logs while it holds the lock.
pub struct LockedAlloc {
    heap: Mutex<Option<MemAlloc<MappedHeap>>>,
}

impl LockedAlloc {
    pub const fn new() -> Self {
        Self { heap: Mutex::new(None) }
    }

    /// Runs `f` on the heap, creating it first if needed. Returns `None` if
    /// the heap cannot be created.
    fn with_heap<T>(&self, f: impl FnOnce(&mut MemAlloc<MappedHeap>) -> T) -> Option<T> {
        let mut guard = self.heap.lock();

        if guard.is_none() {
            match MemAlloc::new() {
                Ok(heap) => *guard = Some(heap),
                Err(err) => {
                    log::warn!("global heap could not be created: {err}");
                    return None;
                }
            }
        }

        guard.as_mut().map(f)
    }

    /// Runs the consistency checker on the heap. `None` if no allocation
    /// happened yet.
    pub fn check(&self) -> Option<Result<HeapStats, HeapError>> {
        self.heap.lock().as_ref().map(MemAlloc::check)
    }
}

impl Default for LockedAlloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for LockedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.with_heap(|heap| heap.allocate(layout.size()))
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        self.with_heap(|heap| unsafe { heap.free(ptr) });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(ptr) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.with_heap(|heap| unsafe { heap.resize(ptr, new_size) })
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn alloc_and_dealloc_through_global_alloc() {
        let allocator = LockedAlloc::new();
        let layout = Layout::new::<u64>();

        unsafe {
            let ptr = allocator.alloc(layout).cast::<u64>();
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % layout.align(), 0);
            ptr.write(0xDEAD_BEEF);

            let grown = allocator.realloc(ptr.cast(), layout, 256).cast::<u64>();
            assert!(!grown.is_null());
            assert_eq!(grown.read(), 0xDEAD_BEEF);

            allocator.dealloc(grown.cast(), Layout::from_size_align(256, 8).unwrap());
        }
    }

    #[test]
    fn over_aligned_layouts_are_refused() {
        let allocator = LockedAlloc::new();
        assert!(allocator.check().is_none());
        let layout = Layout::from_size_align(64, 4 * ALIGNMENT).unwrap();

        unsafe {
            assert!(allocator.alloc(layout).is_null());
        }
    }

    #[test]
    fn threads_share_one_heap() {
        let allocator = Arc::new(LockedAlloc::new());

        let handles: Vec<_> = (0..4u8)
            .map(|id| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    let layout = Layout::array::<u8>(48).unwrap();
                    for _ in 0..200 {
                        unsafe {
                            let ptr = allocator.alloc(layout);
                            assert!(!ptr.is_null());
                            ptr.write_bytes(id, 48);
                            for i in 0..48 {
                                assert_eq!(*ptr.add(i), id);
                            }
                            allocator.dealloc(ptr, layout);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = allocator.check().unwrap().unwrap();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.free_blocks, 1);
    }
}
