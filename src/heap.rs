//! Boundary-tagged heap over a fixed arena.
//!
//! The heap keeps its control block at the start of the arena it is given
//! and grows a sequence of blocks from there:
//!
//! ```text
//! +---------+---------------------------------------------+-----------------+
//! | control | Block | Block | Block | ...                 |   never used    |
//! +---------+---------------------------------------------+-----------------+
//!           ^ base                                        ^ top             ^ base + limit
//! ```
//!
//! Blocks below `top` are either handed out or on the [`FreeList`]. When no
//! free block fits a request the heap expands by writing a new block at
//! `top`. Freed blocks that end at `top` are given back by retracting it.

use core::{fmt, mem, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
    block::{BLOCK_ALIGN, Block, FOOTER_SIZE, HEADER_SIZE, erase_footer},
    config::HeapConfig,
    error::HeapError,
    freelist::{Arena, FreeList},
    utils::{align, align_down, checked_align},
};

/// Bytes reserved for the control block at the start of the arena.
const CONTROL_SIZE: usize = align(mem::size_of::<HeapControl>(), BLOCK_ALIGN);

/// Smallest arena that can hold a heap with one block of `granularity` bytes.
pub const fn min_heap_size(granularity: usize) -> usize {
    CONTROL_SIZE + HEADER_SIZE + granularity + FOOTER_SIZE
}

/// State of a heap. It lives inside the arena it manages.
pub(crate) struct HeapControl {
    /// First byte available for blocks.
    pub base: usize,
    /// First byte never handed to a block.
    pub top: usize,
    /// Bytes available for blocks, starting at `base`.
    pub limit: usize,
    pub free: FreeList,
    pub config: HeapConfig,
}

/// Handle to a heap created with [`Heap::create`].
///
/// All operations take `&mut self`: the heap is not synchronized. Wrap it in
/// a [`LockedHeap`](crate::LockedHeap) to share it.
pub struct Heap {
    control: NonNull<HeapControl>,
}

// SAFETY: the handle is the only way to reach the control block and the
// arena, so moving it to another thread moves the whole heap.
unsafe impl Send for Heap {}

/// One block as seen by [`Heap::regions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    /// Address of the header.
    pub addr: usize,
    /// Payload bytes.
    pub limit: usize,
    pub used: bool,
}

impl RegionInfo {
    /// Bytes taken by the block, boundary tags included.
    pub const fn size(&self) -> usize {
        HEADER_SIZE + self.limit + FOOTER_SIZE
    }

    /// Address handed out for this block.
    pub const fn payload(&self) -> usize {
        self.addr + HEADER_SIZE
    }
}

impl From<Block> for RegionInfo {
    fn from(block: Block) -> Self {
        Self {
            addr: block.addr(),
            limit: block.limit(),
            used: block.is_used(),
        }
    }
}

/// Summary of a heap, see [`Heap::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes available for blocks.
    pub capacity: usize,
    /// Bytes between `base` and `top`.
    pub reserved: usize,
    /// Payload bytes of used blocks.
    pub used_bytes: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    pub used_regions: usize,
    pub free_regions: usize,
}

impl HeapStats {
    /// Bytes spent on boundary tags.
    pub const fn overhead(&self) -> usize {
        self.reserved - self.used_bytes - self.free_bytes
    }

    /// Bytes above `top` that expansion can still use.
    pub const fn untouched(&self) -> usize {
        self.capacity - self.reserved
    }
}

impl Heap {
    /// Creates a heap with the default [`HeapConfig`] over
    /// `[base, base + limit)`.
    ///
    /// **SAFETY**: the range must be valid, writable, and exclusively owned
    /// by the new heap for as long as the heap (or any pointer it returns)
    /// is in use. Anything stored there before is overwritten.
    pub unsafe fn create(base: *mut u8, limit: usize) -> Result<Self, HeapError> {
        unsafe { Self::create_with(base, limit, HeapConfig::new()) }
    }

    /// Same as [`Heap::create`] with an explicit configuration.
    ///
    /// **SAFETY**: see [`Heap::create`].
    pub unsafe fn create_with(
        base: *mut u8,
        limit: usize,
        config: HeapConfig,
    ) -> Result<Self, HeapError> {
        config.validate()?;

        let start = base as usize;
        if start == 0 || start.checked_add(limit).is_none() {
            return Err(HeapError::InvalidPointer { addr: start });
        }

        let minimum = min_heap_size(config.granularity);
        let aligned =
            checked_align(start, BLOCK_ALIGN).ok_or(HeapError::InvalidPointer { addr: start })?;
        let slack = aligned - start;

        if limit < slack + minimum {
            return Err(HeapError::HeapTooSmall { limit, minimum });
        }

        let heap_base = aligned + CONTROL_SIZE;
        let heap_limit = align_down(limit - slack - CONTROL_SIZE, BLOCK_ALIGN);

        let control = aligned as *mut HeapControl;
        unsafe {
            control.write(HeapControl {
                base: heap_base,
                top: heap_base,
                limit: heap_limit,
                free: FreeList::new(),
                config,
            });
        }

        debug!(
            "heap created at {:#x}: base={:#x} capacity={} bytes",
            aligned, heap_base, heap_limit
        );

        Ok(Self {
            // SAFETY: `aligned` is at least `start`, which is non-null.
            control: unsafe { NonNull::new_unchecked(control) },
        })
    }

    #[inline]
    fn control(&self) -> &HeapControl {
        // SAFETY: the control block was written by `create_with` and only
        // this handle reaches it.
        unsafe { self.control.as_ref() }
    }

    #[inline]
    fn control_mut(&mut self) -> &mut HeapControl {
        // SAFETY: see `control`, `&mut self` makes the access exclusive.
        unsafe { self.control.as_mut() }
    }

    /// Allocates `size` bytes, rounded up to the heap granularity.
    ///
    /// The returned pointer is aligned to 16 bytes and stays valid until it
    /// is given to [`Heap::free`].
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.control_mut().alloc(size)
    }

    /// Gives back memory obtained from [`Heap::alloc`].
    ///
    /// Pointers that are not a live allocation of this heap are rejected
    /// without touching the heap.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        self.control_mut().free(ptr.as_ptr() as usize)
    }

    /// Whether `ptr` is the payload of a block with consistent boundary tags.
    pub fn is_valid(&self, ptr: NonNull<u8>) -> bool {
        let control = self.control();
        (ptr.as_ptr() as usize)
            .checked_sub(HEADER_SIZE)
            .and_then(|addr| control.validate(addr))
            .is_some()
    }

    /// Payload size of the live allocation at `ptr`.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let control = self.control();
        (ptr.as_ptr() as usize)
            .checked_sub(HEADER_SIZE)
            .and_then(|addr| control.validate(addr))
            .filter(|block| block.is_used())
            .map(|block| block.limit())
    }

    /// Whether `ptr` points into the block area of this heap.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let control = self.control();
        addr >= control.base && addr < control.end()
    }

    /// First byte available for blocks.
    pub fn base(&self) -> usize {
        self.control().base
    }

    /// First byte not covered by any block.
    pub fn top(&self) -> usize {
        self.control().top
    }

    /// Bytes available for blocks.
    pub fn capacity(&self) -> usize {
        self.control().limit
    }

    pub fn config(&self) -> HeapConfig {
        self.control().config
    }

    /// Number of blocks on the free list.
    pub fn free_regions(&self) -> usize {
        self.control().free.len()
    }

    /// Walks every block from `base` to `top` in address order.
    ///
    /// The walk stops early at the first block whose tags do not validate.
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        let control = self.control();
        let mut addr = control.base;

        core::iter::from_fn(move || {
            if addr >= control.top {
                return None;
            }
            let block = control.validate(addr)?;
            addr = block.end();
            Some(RegionInfo::from(block))
        })
    }

    /// Free list in list order (most recently inserted first).
    pub fn free_list(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        let control = self.control();
        control.free.blocks(control.arena()).map(RegionInfo::from)
    }

    pub fn stats(&self) -> HeapStats {
        let control = self.control();
        let mut stats = HeapStats {
            capacity: control.limit,
            reserved: control.top - control.base,
            free_regions: control.free.len(),
            ..HeapStats::default()
        };

        for region in self.regions() {
            if region.used {
                stats.used_bytes += region.limit;
                stats.used_regions += 1;
            } else {
                stats.free_bytes += region.limit;
            }
        }

        stats
    }

    /// Logs every block at debug level.
    pub fn dump(&self) {
        let control = self.control();
        debug!(
            "heap base={:#x} top={:#x} limit={} free={}",
            control.base,
            control.top,
            control.limit,
            control.free.len()
        );
        for region in self.regions() {
            debug!(
                "  [{:#x}] base={:#x} limit={} {}",
                region.addr,
                region.payload(),
                region.limit,
                if region.used { "used" } else { "free" }
            );
        }
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = self.control();
        f.debug_struct("Heap")
            .field("base", &format_args!("{:#x}", control.base))
            .field("top", &format_args!("{:#x}", control.top))
            .field("limit", &control.limit)
            .field("free_regions", &control.free.len())
            .finish()
    }
}

impl HeapControl {
    #[inline]
    pub fn arena(&self) -> Arena {
        Arena { base: self.base }
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.limit
    }

    /// Smallest block that is worth creating, tags included.
    #[inline]
    pub fn min_block_size(&self) -> usize {
        HEADER_SIZE + self.config.granularity + FOOTER_SIZE
    }

    /// Rounds a request to the granularity, `None` on overflow.
    #[inline]
    pub fn round(&self, size: usize) -> Option<usize> {
        checked_align(size.max(self.config.granularity), self.config.granularity)
    }

    /// Returns the block at `addr` if its boundary tags agree and it lies
    /// completely inside `[base, top)`.
    pub fn validate(&self, addr: usize) -> Option<Block> {
        let last = self.top.checked_sub(self.min_block_size())?;
        if addr < self.base || addr > last || addr % BLOCK_ALIGN != 0 {
            return None;
        }

        // SAFETY: `addr` is aligned and a whole block fits below `top`.
        let block = unsafe { Block::at(addr) };
        let limit = block.limit();
        if limit == 0 || block.base() != addr + HEADER_SIZE {
            return None;
        }

        let footer_addr = block.base().checked_add(limit)?;
        if footer_addr % BLOCK_ALIGN != 0 || footer_addr.checked_add(FOOTER_SIZE)? > self.top {
            return None;
        }

        // SAFETY: the footer was just checked to be inside the heap.
        let footer = unsafe { block.footer() };
        (footer.header == addr && footer.base == block.base()).then_some(block)
    }

    /// Writes a new free block at `top`.
    ///
    /// The block is at least `size` bytes, and grows to the preferred
    /// expansion size when the arena still has room for it.
    pub fn expand(&mut self, size: usize) -> Result<Block, HeapError> {
        let size = self.round(size).ok_or(HeapError::OutOfMemory { requested: size })?;
        let available = self.end() - self.top;

        let fits = |limit: usize| {
            HEADER_SIZE
                .checked_add(limit)
                .and_then(|total| total.checked_add(FOOTER_SIZE))
                .is_some_and(|total| total <= available)
        };

        let preferred = self.round(self.config.expand_size).unwrap_or(size).max(size);
        let limit = if fits(preferred) {
            preferred
        } else if fits(size) {
            size
        } else {
            debug!(
                "heap at {:#x} cannot expand by {} bytes ({} available)",
                self.base, size, available
            );
            return Err(HeapError::OutOfMemory { requested: size });
        };

        // SAFETY: the new block fits between `top` and the end of the arena.
        let block = unsafe { Block::write(self.top, limit) };
        trace!("heap top expanded from {:#x} to {:#x}", self.top, block.end());
        self.top = block.end();
        self.free.insert_free_block(self.arena(), block);

        Ok(block)
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let size = self.round(size).ok_or(HeapError::OutOfMemory { requested: size })?;

        let block = match self.free.find_free_block(self.arena(), size) {
            Some(block) => block,
            None => self.expand(size)?,
        };

        if self.validate(block.addr()).is_none() {
            warn!("free block at {:#x} has corrupted boundary tags", block.addr());
            return Err(HeapError::CorruptedBoundaryTag { addr: block.addr() });
        }

        self.free.remove_free_block(self.arena(), block);
        block.set_used(true);

        if block.limit() - size >= self.min_block_size() {
            self.split(block, size);
        }

        trace!("heap alloc {} bytes at {:#x}", size, block.payload());

        // SAFETY: payload addresses are never zero.
        Ok(unsafe { NonNull::new_unchecked(block.payload() as *mut u8) })
    }

    pub fn free(&mut self, ptr: usize) -> Result<(), HeapError> {
        let Some(addr) = ptr
            .checked_sub(HEADER_SIZE)
            .filter(|addr| *addr >= self.base && ptr < self.top)
        else {
            warn!("free of {:#x} outside of heap at {:#x}", ptr, self.base);
            return Err(HeapError::InvalidPointer { addr: ptr });
        };

        let Some(block) = self.validate(addr) else {
            warn!("free of {:#x}: boundary tags do not match", ptr);
            return Err(HeapError::CorruptedBoundaryTag { addr: ptr });
        };

        if !block.is_used() {
            warn!("free of {:#x}: block is not allocated", ptr);
            return Err(HeapError::NotAllocated { addr: ptr });
        }

        block.set_used(false);

        let block = self.merge_with_prev(block);
        self.merge_with_next(block);

        if block.end() == self.top {
            trace!("heap top contracted from {:#x} to {:#x}", self.top, block.addr());
            self.top = block.addr();
            // SAFETY: the footer belongs to the block being dropped.
            unsafe { erase_footer(block.footer_addr()) };
            block.erase();
        } else {
            self.free.insert_free_block(self.arena(), block);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AVG_ALLOC_SIZE, MEMREG_GRANULARITY};

    /// Backing memory for a test heap, kept alive by the caller.
    fn memory(len: usize) -> Vec<u128> {
        vec![0u128; len / mem::size_of::<u128>()]
    }

    fn heap(memory: &mut [u128], config: HeapConfig) -> Heap {
        let len = memory.len() * mem::size_of::<u128>();
        unsafe { Heap::create_with(memory.as_mut_ptr().cast(), len, config).unwrap() }
    }

    fn block_of(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize - HEADER_SIZE
    }

    fn assert_conserved(heap: &Heap) {
        let regions: Vec<_> = heap.regions().collect();
        let covered: usize = regions.iter().map(RegionInfo::size).sum();
        assert_eq!(covered, heap.top() - heap.base());

        let free_in_walk = regions.iter().filter(|r| !r.used).count();
        assert_eq!(free_in_walk, heap.free_regions());
        assert!(heap.free_list().all(|r| !r.used));
    }

    #[test]
    fn create_rejects_tiny_arena() {
        let mut mem = memory(64);
        let len = mem.len() * 16;
        let result = unsafe { Heap::create(mem.as_mut_ptr().cast(), len) };

        assert_eq!(
            result.err(),
            Some(HeapError::HeapTooSmall {
                limit: len,
                minimum: min_heap_size(MEMREG_GRANULARITY)
            })
        );
    }

    #[test]
    fn create_rejects_null_and_bad_config() {
        let result = unsafe { Heap::create(core::ptr::null_mut(), 0x1000) };
        assert_eq!(result.err(), Some(HeapError::InvalidPointer { addr: 0 }));

        let mut mem = memory(0x1000);
        let config = HeapConfig::new().with_granularity(8);
        let result = unsafe { Heap::create_with(mem.as_mut_ptr().cast(), 0x1000, config) };
        assert_eq!(result.err(), Some(HeapError::InvalidConfig { granularity: 8 }));
    }

    #[test]
    fn new_heap_is_empty() {
        let mut mem = memory(0x1000);
        let heap = heap(&mut mem, HeapConfig::new());

        assert_eq!(heap.top(), heap.base());
        assert_eq!(heap.capacity(), 0x1000 - CONTROL_SIZE);
        assert_eq!(heap.free_regions(), 0);
        assert_eq!(heap.regions().count(), 0);
    }

    #[test]
    fn first_alloc_expands_from_top() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new());

        let ptr = heap.alloc(10).unwrap();

        assert_eq!(block_of(ptr), heap.base());
        assert_eq!(ptr.as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(heap.usable_size(ptr), Some(MEMREG_GRANULARITY));
        // The preferred expansion chunk was split, the rest is listed.
        assert_eq!(
            heap.top() - heap.base(),
            HEADER_SIZE + AVG_ALLOC_SIZE + FOOTER_SIZE
        );
        assert_eq!(heap.free_regions(), 1);
        assert_conserved(&heap);
    }

    #[test]
    fn zero_expand_size_grows_by_the_request() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new().with_expand_size(0));

        let ptr = heap.alloc(10).unwrap();

        assert_eq!(heap.usable_size(ptr), Some(MEMREG_GRANULARITY));
        assert_eq!(
            heap.top() - heap.base(),
            HEADER_SIZE + MEMREG_GRANULARITY + FOOTER_SIZE
        );
        assert_eq!(heap.free_regions(), 0);
        assert_conserved(&heap);
    }

    #[test]
    fn two_allocations_freed_in_any_order_empty_the_heap() {
        for reversed in [false, true] {
            let mut mem = memory(0x1000);
            let mut heap = heap(&mut mem, HeapConfig::new());

            let a = heap.alloc(16).unwrap();
            let b = heap.alloc(16).unwrap();
            assert_ne!(a, b);

            let (first, second) = if reversed { (b, a) } else { (a, b) };
            heap.free(first).unwrap();
            assert_conserved(&heap);
            heap.free(second).unwrap();

            assert_eq!(heap.top(), heap.base());
            assert_eq!(heap.free_regions(), 0);
            assert_eq!(heap.stats().untouched(), heap.capacity());
        }
    }

    #[test]
    fn freed_block_is_reused() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new());

        let a = heap.alloc(64).unwrap();
        let _guard = heap.alloc(64).unwrap();
        heap.free(a).unwrap();

        let b = heap.alloc(32).unwrap();
        assert_eq!(a, b);
        assert_conserved(&heap);
    }

    #[test]
    fn coalesces_with_both_neighbours() {
        let mut mem = memory(0x2000);
        let mut heap = heap(&mut mem, HeapConfig::new());

        let a = heap.alloc(32).unwrap();
        let b = heap.alloc(32).unwrap();
        let c = heap.alloc(32).unwrap();
        let _guard = heap.alloc(32).unwrap();

        heap.free(a).unwrap();
        heap.free(c).unwrap();
        let before = heap.free_regions();
        heap.free(b).unwrap();

        // a, b and c are now one free block starting at a.
        assert_eq!(heap.free_regions(), before - 1);
        let merged = heap
            .regions()
            .find(|r| r.addr == block_of(a))
            .unwrap();
        assert!(!merged.used);
        assert_eq!(merged.limit, 3 * 32 + 2 * (HEADER_SIZE + FOOTER_SIZE));
        assert!(!heap.is_valid(b));
        assert_conserved(&heap);
    }

    #[test]
    fn double_free_is_reported() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new());

        let a = heap.alloc(16).unwrap();
        let _guard = heap.alloc(16).unwrap();
        heap.free(a).unwrap();

        assert_eq!(
            heap.free(a),
            Err(HeapError::NotAllocated {
                addr: a.as_ptr() as usize
            })
        );
        assert_conserved(&heap);
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new());
        let a = heap.alloc(64).unwrap();

        let mut outside = 0u64;
        let outside = NonNull::from(&mut outside).cast::<u8>();
        assert_eq!(
            heap.free(outside),
            Err(HeapError::InvalidPointer {
                addr: outside.as_ptr() as usize
            })
        );

        let inner = unsafe { NonNull::new_unchecked(a.as_ptr().add(16)) };
        assert_eq!(
            heap.free(inner),
            Err(HeapError::CorruptedBoundaryTag {
                addr: inner.as_ptr() as usize
            })
        );
        assert_eq!(heap.usable_size(a), Some(64));
    }

    #[test]
    fn corrupted_footer_is_detected() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new());

        let a = heap.alloc(32).unwrap();
        let _guard = heap.alloc(32).unwrap();
        let top = heap.top();

        // Overrun the payload into the footer.
        unsafe { a.as_ptr().write_bytes(0xAB, 32 + FOOTER_SIZE) };

        assert!(!heap.is_valid(a));
        assert_eq!(
            heap.free(a),
            Err(HeapError::CorruptedBoundaryTag {
                addr: a.as_ptr() as usize
            })
        );
        assert_eq!(heap.top(), top);
    }

    #[test]
    fn exhaustion_is_not_fatal() {
        let mut mem = memory(0x1000);
        let mut heap = heap(&mut mem, HeapConfig::new());
        let capacity = heap.capacity();

        assert_eq!(
            heap.alloc(capacity),
            Err(HeapError::OutOfMemory {
                requested: capacity
            })
        );
        assert_eq!(heap.top(), heap.base());

        let largest = capacity - HEADER_SIZE - FOOTER_SIZE;
        let all = heap.alloc(largest).unwrap();
        assert_eq!(heap.stats().untouched(), 0);
        assert!(heap.alloc(16).is_err());

        heap.free(all).unwrap();
        assert!(heap.alloc(16).is_ok());
    }

    #[test]
    fn tail_remainder_is_dropped_past_free_limit() {
        for limit in [0, FREE_LIMIT_ROOMY] {
            let mut mem = memory(0x1000);
            let config = HeapConfig::new().with_free_regions_limit(limit);
            let mut heap = heap(&mut mem, config);

            let a = heap.alloc(16).unwrap();
            // Takes the whole tail remainder of the first chunk.
            let rest = AVG_ALLOC_SIZE - 16 - HEADER_SIZE - FOOTER_SIZE;
            let _g = heap.alloc(rest).unwrap();
            heap.free(a).unwrap();
            assert_eq!(heap.free_regions(), 1);

            let x = heap.alloc(100).unwrap();
            let x_end = x.as_ptr() as usize + 112 + FOOTER_SIZE;

            if limit == 0 {
                assert_eq!(heap.top(), x_end);
                assert_eq!(heap.free_regions(), 1);
            } else {
                assert_eq!(heap.top(), x_end + HEADER_SIZE + 64 + FOOTER_SIZE);
                assert_eq!(heap.free_regions(), 2);
            }
            assert_conserved(&heap);

            heap.free(x).unwrap();
            assert_conserved(&heap);
        }
    }

    const FREE_LIMIT_ROOMY: usize = 64;

    #[test]
    fn mixed_sequence_keeps_heap_consistent() {
        let mut mem = memory(0x8000);
        let mut heap = heap(&mut mem, HeapConfig::new());
        let mut live: Vec<NonNull<u8>> = Vec::new();
        let mut seed = 0x2545_f491_u32;

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            if seed % 3 == 0 && !live.is_empty() {
                let victim = live.swap_remove(seed as usize % live.len());
                heap.free(victim).unwrap();
            } else if let Ok(ptr) = heap.alloc(seed as usize % 300) {
                live.push(ptr);
            }
            assert_conserved(&heap);
        }

        for ptr in live.drain(..) {
            heap.free(ptr).unwrap();
        }
        assert_eq!(heap.top(), heap.base());
        assert_eq!(heap.free_regions(), 0);
    }
}
