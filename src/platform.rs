//! Backing memory for hosted runs.
//!
//! On real hardware the memory core is handed a physical extent by the boot
//! loader. Tests and demos run as ordinary processes instead, so they ask
//! the operating system for an anonymous mapping and pretend it is the boot
//! extent. [`HostArena`] owns such a mapping and returns it when dropped.

use core::ptr::NonNull;

use crate::bootmem::BootExtent;

/// Low level memory requests to the host kernel. Each platform has its own
/// API for it, the rest of the crate only sees this trait.
pub trait PlatformMemory {
    /// Requests `len` bytes of zeroed read-write memory. Returns `None` when
    /// the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Gives `len` bytes starting at `addr` back to the host.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize);

    /// Virtual memory page size in bytes.
    fn page_size() -> usize;
}

/// The host operating system.
pub struct Host;

#[cfg(unix)]
mod unix {
    use core::{
        ffi::{c_int, c_void},
        ptr::{self, NonNull},
    };

    use libc::{mmap, munmap, off_t, size_t};

    use super::{Host, PlatformMemory};

    impl PlatformMemory for Host {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            // SAFETY: an anonymous private mapping aliases nothing.
            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

            match addr {
                libc::MAP_FAILED => None,
                addr => NonNull::new(addr.cast::<u8>()),
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            // SAFETY: the caller hands back a mapping it got from `request_memory`.
            if unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) } != 0 {
                log::warn!("munmap of {:p} ({} bytes) failed", addr, len);
            }
        }

        fn page_size() -> usize {
            // SAFETY: sysconf has no preconditions.
            match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
                size if size > 0 => size as usize,
                _ => crate::config::UNIT_SIZE,
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use core::{ffi::c_void, mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Host, PlatformMemory};

    impl PlatformMemory for Host {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            // SAFETY: letting the system pick the address aliases nothing.
            let addr = unsafe { Memory::VirtualAlloc(None, len, flags, protection) };

            NonNull::new(addr.cast())
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
            // SAFETY: the caller hands back memory it got from `request_memory`.
            let released = unsafe {
                Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE)
            };
            if let Err(err) = released {
                log::warn!("VirtualFree of {:p} failed: {}", addr, err);
            }
        }

        fn page_size() -> usize {
            let mut system_info = MaybeUninit::uninit();
            // SAFETY: GetSystemInfo fills the whole struct.
            unsafe {
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// Anonymous host mapping used as a stand-in for physical memory.
///
/// ```no_run
/// use kmemalloc::{HostArena, Kernel, MemoryConfig};
///
/// let arena = HostArena::new(4 << 20).unwrap();
/// let mut kernel = unsafe { Kernel::boot(arena.extent(), MemoryConfig::new()).unwrap() };
/// let unit = kernel.allocate_unit().unwrap();
/// kernel.free_unit(unit).unwrap();
/// ```
#[derive(Debug)]
pub struct HostArena {
    addr: NonNull<u8>,
    len: usize,
}

// SAFETY: the arena exclusively owns its mapping.
unsafe impl Send for HostArena {}

impl HostArena {
    /// Maps at least `len` bytes, rounded up to whole pages.
    pub fn new(len: usize) -> Option<Self> {
        let len = crate::utils::checked_align(len.max(1), Host::page_size())?;
        // SAFETY: a fresh mapping is owned by nobody else.
        let addr = unsafe { Host::request_memory(len)? };
        log::trace!("host arena of {} bytes at {:p}", len, addr);
        Some(Self { addr, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn addr(&self) -> usize {
        self.addr.as_ptr() as usize
    }

    /// The whole mapping as a boot extent.
    pub fn extent(&self) -> BootExtent {
        BootExtent::new(self.addr(), self.len)
    }
}

impl Drop for HostArena {
    fn drop(&mut self) {
        // SAFETY: the mapping came from `request_memory` with this length.
        unsafe { Host::return_memory(self.addr, self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(Host::page_size().is_power_of_two());
    }

    #[test]
    fn arena_is_page_aligned_and_writable() {
        let arena = HostArena::new(10_000).unwrap();
        assert_eq!(arena.addr() % Host::page_size(), 0);
        assert!(arena.len() >= 10_000);

        unsafe {
            arena.as_ptr().write_bytes(0xAB, arena.len());
            assert_eq!(*arena.as_ptr().add(arena.len() - 1), 0xAB);
        }

        let extent = arena.extent();
        assert_eq!(extent.start, arena.addr());
        assert_eq!(extent.length, arena.len());
        assert_eq!(extent.watermark, arena.addr());
    }
}
