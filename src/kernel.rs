use std::{ptr::NonNull, sync::OnceLock};

/// Virtual memory page size of the computer. This is usually 4096.
/// We can't make it a constant since we don't know the value at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Zero sized handle to the operating system. Here is where we keep the
/// platform-dependant stuff so the rest of the allocator never touches a syscall.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
pub(crate) trait PlatformMemory {
    /// Reserve a readable and writable memory region of size `len`. It returns a
    /// pointer to the given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size once.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
}

/// Wrapper to use [`Kernel::request_memory`]
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::request_memory(len) }
}

/// Wrapper to use [`Kernel::return_memory`]
#[inline]
pub(crate) unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
    unsafe { Kernel::return_memory(addr, len) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn request_and_return_memory() {
        let len = 2 * page_size();
        unsafe {
            let addr = request_memory(len).expect("mmap failed");
            assert_eq!(addr.as_ptr() as usize % page_size(), 0);

            addr.as_ptr().write_bytes(0xAB, len);
            assert_eq!(*addr.as_ptr().add(len - 1), 0xAB);

            return_memory(addr, len);
        }
    }
}
