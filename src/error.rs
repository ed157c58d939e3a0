use std::fmt;

/// Errors reported by the allocator and its backing store.
///
/// Running out of memory inside [`crate::MemAlloc::allocate`] or
/// [`crate::MemAlloc::resize`] is not reported through this type: those calls
/// return `None`, like `malloc` returning null. `HeapError` shows up when
/// building a heap, when a [`crate::HeapSource`] refuses to grow, and when the
/// consistency checker finds a broken heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// The backing store cannot grow by `requested` bytes. Only `available`
    /// bytes are left before its limit.
    Exhausted { requested: usize, available: usize },
    /// The platform refused to reserve `len` bytes of address space.
    MapFailed { len: usize },
    /// A [`crate::HeapSource`] handed out memory the heap cannot use: a
    /// misaligned base or growth that does not continue the previous end.
    BadSource { reason: &'static str },
    /// The heap structure is broken at byte `offset` from the heap base.
    Corrupted { offset: usize, reason: &'static str },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::Exhausted { requested, available } => write!(
                f,
                "heap exhausted: requested {requested} bytes, {available} available"
            ),
            HeapError::MapFailed { len } => {
                write!(f, "failed to reserve {len} bytes of address space")
            }
            HeapError::BadSource { reason } => write!(f, "unusable backing store: {reason}"),
            HeapError::Corrupted { offset, reason } => {
                write!(f, "heap corrupted at offset {offset:#x}: {reason}")
            }
        }
    }
}

impl std::error::Error for HeapError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = HeapError::Exhausted { requested: 4112, available: 16 };
        assert_eq!(err.to_string(), "heap exhausted: requested 4112 bytes, 16 available");

        let err = HeapError::Corrupted { offset: 0xa0, reason: "header and footer differ" };
        assert_eq!(err.to_string(), "heap corrupted at offset 0xa0: header and footer differ");

        let err = HeapError::BadSource { reason: "heap base is not aligned" };
        assert_eq!(err.to_string(), "unusable backing store: heap base is not aligned");
    }
}
