//! The memory core as one context.
//!
//! [`Kernel::boot`] splits the boot extent the way the kernel expects it:
//!
//! ```text
//!  extent.start                                              extent.end()
//!  +----------------------------+---+--------------------------------+--+
//!  |  kernel heap (heap_size)   |pad|  units managed by PhysMem      |  |
//!  +----------------------------+---+--------------------------------+--+
//! ```
//!
//! The heap comes first because the unit allocator keeps its extent nodes
//! in it.

use core::ptr::NonNull;

use log::info;

use crate::{
    bootmem::BootExtent,
    config::MemoryConfig,
    error::{HeapError, MemoryError, PhysMemError},
    heap::Heap,
    physmem::PhysMem,
};

/// Kernel heap plus unit allocator built on the same boot extent.
#[derive(Debug)]
pub struct Kernel {
    heap: Heap,
    physmem: PhysMem,
}

impl Kernel {
    /// Builds the memory core on `extent`.
    ///
    /// The first `config.heap_size` bytes become the kernel heap, whatever
    /// follows is rounded inwards to whole units and handed to the unit
    /// allocator. Frees below `extent.watermark` (or below the first unit)
    /// are refused.
    ///
    /// **SAFETY**: the extent must be writable memory owned by the returned
    /// kernel for as long as it or any allocation it hands out is in use.
    pub unsafe fn boot(extent: BootExtent, config: MemoryConfig) -> Result<Self, MemoryError> {
        let required = config.heap_size;
        if extent.length <= required {
            return Err(MemoryError::ExtentTooSmall {
                length: extent.length,
                required,
            });
        }

        // SAFETY: forwarded from the caller.
        let mut heap =
            unsafe { Heap::create_with(extent.start as *mut u8, required, config.heap)? };

        let physmem = PhysMem::setup_with_watermark(
            &mut heap,
            extent.start + required,
            extent.length - required,
            extent.watermark,
        )?;

        info!(
            "memory core up: heap at {:#x} ({} KiB), {} units at {:#x}",
            heap.base(),
            heap.capacity() / 1024,
            physmem.total_units(),
            physmem.base()
        );

        Ok(Self { heap, physmem })
    }

    /// Allocates `size` bytes from the kernel heap.
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.heap.alloc(size)
    }

    /// Returns a pointer obtained from [`kmalloc`](Self::kmalloc).
    pub fn kfree(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        self.heap.free(ptr)
    }

    pub fn allocate_unit(&mut self) -> Result<usize, PhysMemError> {
        self.physmem.allocate_unit(&mut self.heap)
    }

    pub fn allocate_region(&mut self, units: usize) -> Result<usize, PhysMemError> {
        self.physmem.allocate_region(&mut self.heap, units)
    }

    pub fn allocate_region_bytes(&mut self, bytes: usize) -> Result<usize, PhysMemError> {
        self.physmem.allocate_region_bytes(&mut self.heap, bytes)
    }

    pub fn free_unit(&mut self, addr: usize) -> Result<(), PhysMemError> {
        self.physmem.free_unit(&mut self.heap, addr)
    }

    pub fn free_region(&mut self, addr: usize, units: usize) -> Result<usize, PhysMemError> {
        self.physmem.free_region(&mut self.heap, addr, units)
    }

    pub fn free_region_bytes(&mut self, addr: usize, bytes: usize) -> Result<usize, PhysMemError> {
        self.physmem.free_region_bytes(&mut self.heap, addr, bytes)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn physmem(&self) -> &PhysMem {
        &self.physmem
    }

    /// Logs both allocators at debug level.
    pub fn dump(&self) {
        self.heap.dump();
        self.physmem.dump();
    }
}
