//! Spin-locked wrappers for sharing the allocators.
//!
//! Neither [`Heap`] nor [`Kernel`] synchronizes anything by itself. The
//! wrappers put one lock around a whole instance and start out empty, so
//! they can live in a `static` and be initialized once memory is known.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use log::warn;
use spin::Mutex;

use crate::{
    block::BLOCK_ALIGN,
    bootmem::BootExtent,
    config::{HeapConfig, MemoryConfig},
    error::{HeapError, MemoryError},
    heap::Heap,
    kernel::Kernel,
};

/// A [`Heap`] behind a spin lock, usable as `#[global_allocator]`.
pub struct LockedHeap(Mutex<Option<Heap>>);

impl LockedHeap {
    pub const fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// Creates the heap over `[base, base + limit)`. A heap created before
    /// is forgotten, along with everything allocated from it.
    ///
    /// **SAFETY**: see [`Heap::create`].
    pub unsafe fn init(&self, base: *mut u8, limit: usize) -> Result<(), HeapError> {
        unsafe { self.init_with(base, limit, HeapConfig::new()) }
    }

    /// **SAFETY**: see [`Heap::create`].
    pub unsafe fn init_with(
        &self,
        base: *mut u8,
        limit: usize,
        config: HeapConfig,
    ) -> Result<(), HeapError> {
        let heap = unsafe { Heap::create_with(base, limit, config)? };
        *self.0.lock() = Some(heap);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Runs `f` with the heap locked.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> Result<R, HeapError> {
        let mut heap = self.0.lock();
        let heap = heap.as_mut().ok_or(HeapError::Uninitialized)?;
        Ok(f(heap))
    }

    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.with_heap(|heap| heap.alloc(size))?
    }

    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        self.with_heap(|heap| heap.free(ptr))?
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > BLOCK_ALIGN {
            return ptr::null_mut();
        }

        match LockedHeap::alloc(self, layout.size()) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        if let Err(err) = LockedHeap::free(self, ptr) {
            warn!("dealloc of {:p} failed: {}", ptr, err);
        }
    }
}

/// A [`Kernel`] behind a spin lock. Every call before [`boot`](Self::boot)
/// fails with [`MemoryError::Uninitialized`].
pub struct LockedKernel(Mutex<Option<Kernel>>);

impl LockedKernel {
    pub const fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// **SAFETY**: see [`Kernel::boot`].
    pub unsafe fn boot(&self, extent: BootExtent, config: MemoryConfig) -> Result<(), MemoryError> {
        let kernel = unsafe { Kernel::boot(extent, config)? };
        *self.0.lock() = Some(kernel);
        Ok(())
    }

    pub fn is_booted(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Runs `f` with the memory core locked.
    pub fn with_kernel<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> Result<R, MemoryError> {
        let mut kernel = self.0.lock();
        let kernel = kernel.as_mut().ok_or(MemoryError::Uninitialized)?;
        Ok(f(kernel))
    }

    pub fn kmalloc(&self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.kmalloc(size))??)
    }

    pub fn kfree(&self, ptr: NonNull<u8>) -> Result<(), MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.kfree(ptr))??)
    }

    pub fn allocate_unit(&self) -> Result<usize, MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.allocate_unit())??)
    }

    pub fn allocate_region(&self, units: usize) -> Result<usize, MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.allocate_region(units))??)
    }

    pub fn allocate_region_bytes(&self, bytes: usize) -> Result<usize, MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.allocate_region_bytes(bytes))??)
    }

    pub fn free_unit(&self, addr: usize) -> Result<(), MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.free_unit(addr))??)
    }

    pub fn free_region(&self, addr: usize, units: usize) -> Result<usize, MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.free_region(addr, units))??)
    }

    pub fn free_region_bytes(&self, addr: usize, bytes: usize) -> Result<usize, MemoryError> {
        Ok(self.with_kernel(|kernel| kernel.free_region_bytes(addr, bytes))??)
    }
}
