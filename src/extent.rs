//! Extent nodes of the unit allocator and the pool that stores them.
//!
//! Nodes are addressed by slot index instead of by pointer. The slots live
//! in one slab carved from a [`Heap`]; when every slot is taken the slab is
//! replaced by one twice as large. Slots of nodes absorbed during
//! coalescing go to a vacant chain and are handed out again first.

use core::{mem, ptr::NonNull, slice};

use log::{trace, warn};

use crate::{
    error::{HeapError, PhysMemError},
    heap::Heap,
    list::{Link, NodeStore},
};

/// Slots in the first slab.
const INITIAL_SLOTS: usize = 16;

/// State of an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentState {
    Free,
    Used,
}

/// A maximal run of units sharing the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub state: ExtentState,
    /// First unit index.
    pub start: u32,
    /// Number of units, never zero.
    pub length: u32,
}

impl Extent {
    pub const fn free(start: u32, length: u32) -> Self {
        Self {
            state: ExtentState::Free,
            start,
            length,
        }
    }

    pub const fn used(start: u32, length: u32) -> Self {
        Self {
            state: ExtentState::Used,
            start,
            length,
        }
    }

    /// One past the last unit.
    #[inline]
    pub const fn end(&self) -> u32 {
        self.start + self.length
    }

    #[inline]
    pub const fn contains(&self, unit: u32) -> bool {
        unit >= self.start && unit < self.end()
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == ExtentState::Free
    }
}

/// Slot of the pool: an extent plus its list links.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExtentNode {
    pub extent: Extent,
    pub prev: Link,
    pub next: Link,
}

impl ExtentNode {
    const VACANT: Self = Self {
        extent: Extent::free(0, 0),
        prev: None,
        next: None,
    };
}

/// Heap-backed slab of [`ExtentNode`] slots.
#[derive(Debug)]
pub(crate) struct ExtentPool {
    slab: Option<NonNull<ExtentNode>>,
    capacity: usize,
    /// Chain of reusable slots, linked through `next`.
    vacant: Link,
    live: usize,
}

// SAFETY: the slab is owned by the pool alone.
unsafe impl Send for ExtentPool {}

impl ExtentPool {
    pub const fn new() -> Self {
        Self {
            slab: None,
            capacity: 0,
            vacant: None,
            live: 0,
        }
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slots(&self) -> &[ExtentNode] {
        match self.slab {
            // SAFETY: every slot of the slab was initialized by `grow`.
            Some(slab) => unsafe { slice::from_raw_parts(slab.as_ptr(), self.capacity) },
            None => &[],
        }
    }

    fn slots_mut(&mut self) -> &mut [ExtentNode] {
        match self.slab {
            // SAFETY: see `slots`, `&mut self` makes the access exclusive.
            Some(slab) => unsafe { slice::from_raw_parts_mut(slab.as_ptr(), self.capacity) },
            None => &mut [],
        }
    }

    #[inline]
    pub fn get(&self, at: usize) -> &Extent {
        &self.slots()[at].extent
    }

    #[inline]
    pub fn get_mut(&mut self, at: usize) -> &mut Extent {
        &mut self.slots_mut()[at].extent
    }

    /// Makes sure at least `count` slots can be taken without touching the
    /// heap again. Callers reserve before they start rewiring the list so a
    /// failing heap never leaves the list half updated.
    pub fn reserve(&mut self, heap: &mut Heap, count: usize) -> Result<(), PhysMemError> {
        while self.capacity - self.live < count {
            self.grow(heap)?;
        }
        Ok(())
    }

    /// Stores `extent` in a slot and returns its index.
    pub fn insert(&mut self, heap: &mut Heap, extent: Extent) -> Result<usize, PhysMemError> {
        self.reserve(heap, 1)?;

        let at = self.vacant.ok_or(PhysMemError::NodeStorage(HeapError::OutOfMemory {
            requested: mem::size_of::<ExtentNode>(),
        }))?;
        let slot = &mut self.slots_mut()[at];
        let next_vacant = slot.next;
        *slot = ExtentNode {
            extent,
            prev: None,
            next: None,
        };

        self.vacant = next_vacant;
        self.live += 1;
        Ok(at)
    }

    /// Gives the slot `at` back. Its contents are wiped.
    pub fn release(&mut self, at: usize) {
        let vacant = self.vacant;
        self.slots_mut()[at] = ExtentNode {
            next: vacant,
            ..ExtentNode::VACANT
        };
        self.vacant = Some(at);
        self.live -= 1;
    }

    /// Replaces the slab with one twice as large, copying every slot.
    fn grow(&mut self, heap: &mut Heap) -> Result<(), PhysMemError> {
        let capacity = (self.capacity * 2).max(INITIAL_SLOTS);
        let bytes = capacity * mem::size_of::<ExtentNode>();
        let slab = heap
            .alloc(bytes)
            .map_err(PhysMemError::NodeStorage)?
            .cast::<ExtentNode>();

        // SAFETY: the heap handed out `bytes` bytes aligned to 16, enough
        // for `capacity` nodes, and nothing else refers to them yet.
        unsafe {
            if let Some(old) = self.slab {
                slab.as_ptr()
                    .copy_from_nonoverlapping(old.as_ptr(), self.capacity);
            }
            for at in self.capacity..capacity {
                slab.as_ptr().add(at).write(ExtentNode::VACANT);
            }
        }

        let old = self.slab.replace(slab);
        let old_capacity = mem::replace(&mut self.capacity, capacity);

        // New slots join the vacant chain in index order.
        for at in (old_capacity..capacity).rev() {
            let vacant = self.vacant;
            self.slots_mut()[at].next = vacant;
            self.vacant = Some(at);
        }

        if let Some(old) = old {
            if let Err(err) = heap.free(old.cast()) {
                warn!("extent pool could not return its old slab: {err}");
            }
        }

        trace!("extent pool grown to {capacity} slots");
        Ok(())
    }

    /// Returns the slab to `heap`. The pool is empty afterwards.
    pub fn release_all(&mut self, heap: &mut Heap) {
        if let Some(slab) = self.slab.take() {
            if let Err(err) = heap.free(slab.cast()) {
                warn!("extent pool could not return its slab: {err}");
            }
        }
        self.capacity = 0;
        self.vacant = None;
        self.live = 0;
    }
}

impl NodeStore for ExtentPool {
    fn next(&self, at: usize) -> Link {
        self.slots()[at].next
    }

    fn prev(&self, at: usize) -> Link {
        self.slots()[at].prev
    }

    fn set_next(&mut self, at: usize, link: Link) {
        self.slots_mut()[at].next = link;
    }

    fn set_prev(&mut self, at: usize, link: Link) {
        self.slots_mut()[at].prev = link;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_heap<R>(len: usize, f: impl FnOnce(&mut Heap) -> R) -> R {
        let mut memory = vec![0u128; len / 16];
        let mut heap = unsafe { Heap::create(memory.as_mut_ptr().cast(), len).unwrap() };
        f(&mut heap)
    }

    #[test]
    fn extent_bounds() {
        let extent = Extent::used(10, 4);
        assert_eq!(extent.end(), 14);
        assert!(extent.contains(10));
        assert!(extent.contains(13));
        assert!(!extent.contains(14));
        assert!(!extent.is_free());
    }

    #[test]
    fn pool_grows_through_the_heap() {
        with_heap(0x4000, |heap| {
            let mut pool = ExtentPool::new();
            let first = pool.insert(heap, Extent::free(0, 1)).unwrap();
            assert_eq!(pool.capacity(), INITIAL_SLOTS);
            assert_eq!(heap.stats().used_regions, 1);

            for unit in 1..=INITIAL_SLOTS as u32 {
                pool.insert(heap, Extent::used(unit, 1)).unwrap();
            }

            assert_eq!(pool.capacity(), INITIAL_SLOTS * 2);
            assert_eq!(pool.live(), INITIAL_SLOTS + 1);
            // The old slab went back to the heap.
            assert_eq!(heap.stats().used_regions, 1);
            assert_eq!(*pool.get(first), Extent::free(0, 1));

            pool.release_all(heap);
            assert_eq!(heap.stats().used_regions, 0);
        });
    }

    #[test]
    fn released_slots_are_reused() {
        with_heap(0x4000, |heap| {
            let mut pool = ExtentPool::new();
            let a = pool.insert(heap, Extent::free(0, 1)).unwrap();
            let b = pool.insert(heap, Extent::free(1, 1)).unwrap();
            pool.release(a);

            let c = pool.insert(heap, Extent::used(2, 3)).unwrap();
            assert_eq!(c, a);
            assert_eq!(pool.get(b).start, 1);
            assert_eq!(pool.live(), 2);
        });
    }

    #[test]
    fn exhausted_heap_is_reported() {
        with_heap(0x200, |heap| {
            let mut pool = ExtentPool::new();
            assert!(matches!(
                pool.insert(heap, Extent::free(0, 1)),
                Err(PhysMemError::NodeStorage(_))
            ));
            assert_eq!(pool.live(), 0);
        });
    }
}
