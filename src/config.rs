//! Sizes and tunables of the memory core.
//!
//! The constants are the values a booted kernel uses; [`HeapConfig`] and
//! [`MemoryConfig`] let callers (and tests) build smaller or differently
//! tuned instances without touching the constants.

use crate::block::BLOCK_ALIGN;
use crate::error::HeapError;

/// Size in bytes of one physical unit, the quantum of the unit allocator.
pub const UNIT_SIZE: usize = 4096;

/// Bytes carved from the front of the boot extent for the kernel heap.
pub const KERNEL_HEAP_SIZE: usize = 0x10_0000;

/// Once the free list holds more than this many blocks, a split remainder
/// that touches the heap top is dropped and the top retracts instead.
pub const FREE_MEMREGS_LIMIT: usize = 64;

/// Smallest payload a heap block can have. Requests are rounded up to a
/// multiple of it. Must be a power of two and at least [`BLOCK_ALIGN`].
pub const MEMREG_GRANULARITY: usize = 16;

/// Preferred number of bytes to grow the heap by. Small requests are cut
/// from a chunk of this size instead of growing `top` one block at a time.
pub const AVG_ALLOC_SIZE: usize = 0x100;

/// Tunables of a single [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Allocation granularity in bytes.
    pub granularity: usize,
    /// Free-list length above which tail remainders are given back to the top.
    pub free_regions_limit: usize,
    /// Preferred expansion size in bytes. `0` grows the heap by exactly one
    /// rounded request per expansion.
    pub expand_size: usize,
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            granularity: MEMREG_GRANULARITY,
            free_regions_limit: FREE_MEMREGS_LIMIT,
            expand_size: AVG_ALLOC_SIZE,
        }
    }

    pub const fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity;
        self
    }

    pub const fn with_free_regions_limit(mut self, limit: usize) -> Self {
        self.free_regions_limit = limit;
        self
    }

    pub const fn with_expand_size(mut self, expand_size: usize) -> Self {
        self.expand_size = expand_size;
        self
    }

    /// Checks that the granularity keeps every boundary tag aligned.
    pub fn validate(&self) -> Result<(), HeapError> {
        if !self.granularity.is_power_of_two() || self.granularity < BLOCK_ALIGN {
            return Err(HeapError::InvalidConfig {
                granularity: self.granularity,
            });
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Layout of the memory core built by [`Kernel::boot`](crate::Kernel::boot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Bytes reserved for the kernel heap at the start of the boot extent.
    pub heap_size: usize,
    pub heap: HeapConfig,
}

impl MemoryConfig {
    pub const fn new() -> Self {
        Self {
            heap_size: KERNEL_HEAP_SIZE,
            heap: HeapConfig::new(),
        }
    }

    pub const fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }

    pub const fn with_heap(mut self, heap: HeapConfig) -> Self {
        self.heap = heap;
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(HeapConfig::default().validate().is_ok());
        assert_eq!(MemoryConfig::default().heap_size, KERNEL_HEAP_SIZE);
    }

    #[test]
    fn rejects_bad_granularity() {
        for granularity in [0, 4, 24, BLOCK_ALIGN + 1] {
            let config = HeapConfig::new().with_granularity(granularity);
            assert_eq!(
                config.validate(),
                Err(HeapError::InvalidConfig { granularity })
            );
        }
        assert!(HeapConfig::new().with_granularity(64).validate().is_ok());
    }
}
