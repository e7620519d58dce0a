//! Physical unit allocator.
//!
//! The managed range is split into [`UNIT_SIZE`] units and described by a
//! doubly linked list of extents in address order. Together the extents
//! cover the range exactly once, and after every free no two neighbours are
//! both free:
//!
//! ```text
//!  unit 0                                                     total_units
//!  +-------------+------+----------------+-----------+---------------+
//!  | Used (0, 5) | Free | Used (6, 4)    | Free      | Used          |
//!  +-------------+------+----------------+-----------+---------------+
//! ```
//!
//! Unit numbers are relative to the first managed unit, the address of a
//! unit is `base + unit * UNIT_SIZE`. The list nodes are kept in an
//! [`ExtentPool`] whose storage comes from the kernel [`Heap`], so every
//! operation that may create a node takes the heap as an argument.

use core::fmt;

use log::{debug, trace, warn};

use crate::{
    config::UNIT_SIZE,
    error::PhysMemError,
    extent::{Extent, ExtentPool, ExtentState},
    heap::Heap,
    list::{List, NodeStore},
    utils::{align_down, checked_align, unit_of, units_for_bytes},
};

/// State of the unit allocator.
pub struct PhysMem {
    pool: ExtentPool,
    list: List,
    /// Address of unit 0.
    base: usize,
    total_units: u32,
    free_units: u32,
    /// Frees below this address are rejected.
    watermark: usize,
    /// Every unit below this one is used.
    next_free: u32,
}

impl PhysMem {
    /// Takes over `[start, start + length)`, rounded inwards to whole units,
    /// as one free extent.
    pub fn setup(heap: &mut Heap, start: usize, length: usize) -> Result<Self, PhysMemError> {
        Self::setup_with_watermark(heap, start, length, 0)
    }

    /// Like [`setup`](Self::setup), and additionally rejects every free below
    /// `watermark`. The watermark never lies below the first managed unit.
    pub fn setup_with_watermark(
        heap: &mut Heap,
        start: usize,
        length: usize,
        watermark: usize,
    ) -> Result<Self, PhysMemError> {
        let end = start
            .checked_add(length)
            .ok_or(PhysMemError::RangeTooLarge)?;
        let base = checked_align(start, UNIT_SIZE).ok_or(PhysMemError::EmptyRange)?;
        let end = align_down(end, UNIT_SIZE);

        if end <= base {
            return Err(PhysMemError::EmptyRange);
        }

        let total_units =
            u32::try_from((end - base) / UNIT_SIZE).map_err(|_| PhysMemError::RangeTooLarge)?;

        let mut pool = ExtentPool::new();
        let mut list = List::new();
        let at = pool.insert(heap, Extent::free(0, total_units))?;
        list.push_back(&mut pool, at);

        debug!(
            "physmem setup: {:#x}..{:#x}, {} units, watermark {:#x}",
            base,
            end,
            total_units,
            watermark.max(base)
        );

        Ok(Self {
            pool,
            list,
            base,
            total_units,
            free_units: total_units,
            watermark: watermark.max(base),
            next_free: 0,
        })
    }

    /// Allocates one unit and returns its address.
    pub fn allocate_unit(&mut self, heap: &mut Heap) -> Result<usize, PhysMemError> {
        self.allocate_region(heap, 1)
    }

    /// Allocates `units` contiguous units, first-fit in address order.
    pub fn allocate_region(
        &mut self,
        heap: &mut Heap,
        units: usize,
    ) -> Result<usize, PhysMemError> {
        if units == 0 {
            return Err(PhysMemError::ZeroLength);
        }

        let out_of_memory = PhysMemError::OutOfMemory {
            requested: units,
            available: self.free_units as usize,
        };

        if units > self.free_units as usize {
            return Err(out_of_memory);
        }
        // Bounded by `free_units`, so it fits.
        let units = units as u32;

        let Some((at, passed_free)) = self.find_fit(units) else {
            trace!("physmem: no free run of {units} units ({} free)", self.free_units);
            return Err(out_of_memory);
        };

        let extent = *self.pool.get(at);
        if extent.length > units {
            // Remainder stays free right after the allocated part.
            let rest = self
                .pool
                .insert(heap, Extent::free(extent.start + units, extent.length - units))?;
            self.list.insert_after(&mut self.pool, at, rest);
            self.pool.get_mut(at).length = units;
        }
        self.pool.get_mut(at).state = ExtentState::Used;

        self.free_units -= units;
        if !passed_free {
            self.next_free = extent.start + units;
        }

        let addr = self.address_of(extent.start);
        trace!("physmem: allocated {units} units at {addr:#x}");
        Ok(addr)
    }

    /// Allocates enough contiguous units to hold `bytes` bytes.
    pub fn allocate_region_bytes(
        &mut self,
        heap: &mut Heap,
        bytes: usize,
    ) -> Result<usize, PhysMemError> {
        self.allocate_region(heap, units_for_bytes(bytes))
    }

    /// Frees the unit that contains `addr`.
    ///
    /// The unit is merged with free neighbours, so the list stays maximally
    /// coalesced. Addresses outside the managed range or below the
    /// watermark, and units that are not allocated, are rejected without
    /// touching any state.
    pub fn free_unit(&mut self, heap: &mut Heap, addr: usize) -> Result<(), PhysMemError> {
        let unit = self.checked_unit(addr)?;

        if self.free_units == self.total_units {
            warn!("physmem: free of {addr:#x} while every unit is free");
            return Err(PhysMemError::NotAllocated { addr });
        }

        let Some(at) = self.find(unit).filter(|at| !self.pool.get(*at).is_free()) else {
            warn!("physmem: free of {addr:#x}, unit {unit} is not allocated");
            return Err(PhysMemError::NotAllocated { addr });
        };

        self.release(heap, at, unit)
    }

    /// Frees `units` units starting at `addr` one at a time.
    ///
    /// Units in the range that are already free are skipped. Returns how
    /// many units were actually released. The whole range is bounds checked
    /// before anything is freed.
    pub fn free_region(
        &mut self,
        heap: &mut Heap,
        addr: usize,
        units: usize,
    ) -> Result<usize, PhysMemError> {
        if units == 0 {
            return Err(PhysMemError::ZeroLength);
        }

        let first = self.checked_unit(addr)?;
        let last = units
            .checked_sub(1)
            .and_then(|extra| extra.checked_mul(UNIT_SIZE))
            .and_then(|offset| addr.checked_add(offset))
            .ok_or(PhysMemError::InvalidAddress { addr })?;
        self.checked_unit(last)?;

        let mut released = 0;
        for unit in first..first + units as u32 {
            if self.free_units == self.total_units {
                break;
            }
            let Some(at) = self.find(unit) else {
                break;
            };
            if self.pool.get(at).is_free() {
                continue;
            }
            self.release(heap, at, unit)?;
            released += 1;
        }

        trace!("physmem: freed {released} of {units} units at {addr:#x}");
        Ok(released)
    }

    /// Frees every unit overlapping `[addr, addr + bytes)`.
    pub fn free_region_bytes(
        &mut self,
        heap: &mut Heap,
        addr: usize,
        bytes: usize,
    ) -> Result<usize, PhysMemError> {
        if bytes == 0 {
            return Err(PhysMemError::ZeroLength);
        }

        let first = align_down(addr, UNIT_SIZE);
        let end = addr
            .checked_add(bytes)
            .ok_or(PhysMemError::InvalidAddress { addr })?;
        self.free_region(heap, first, units_for_bytes(end - first))
    }

    /// Returns `unit` to the free state. `at` is the used extent holding it.
    fn release(&mut self, heap: &mut Heap, at: usize, unit: u32) -> Result<(), PhysMemError> {
        let extent = *self.pool.get(at);
        let prev = self.list_prev(at).filter(|prev| self.pool.get(*prev).is_free());
        let next = self.list_next(at).filter(|next| self.pool.get(*next).is_free());

        if extent.length == 1 {
            // The whole extent turns free and swallows, or is swallowed by,
            // its free neighbours.
            self.pool.get_mut(at).state = ExtentState::Free;
            let at = match prev {
                Some(prev) => self.absorb(prev, at),
                None => at,
            };
            if let Some(next) = next {
                self.absorb(at, next);
            }
        } else if unit == extent.start {
            match prev {
                Some(prev) => self.pool.get_mut(prev).length += 1,
                None => {
                    let new = self.pool.insert(heap, Extent::free(unit, 1))?;
                    self.list.insert_before(&mut self.pool, at, new);
                }
            }
            let current = self.pool.get_mut(at);
            current.start += 1;
            current.length -= 1;
        } else if unit == extent.end() - 1 {
            match next {
                Some(next) => {
                    let next = self.pool.get_mut(next);
                    next.start -= 1;
                    next.length += 1;
                }
                None => {
                    let new = self.pool.insert(heap, Extent::free(unit, 1))?;
                    self.list.insert_after(&mut self.pool, at, new);
                }
            }
            self.pool.get_mut(at).length -= 1;
        } else {
            // Both nodes are reserved first so a failing heap leaves the
            // list untouched.
            self.pool.reserve(heap, 2)?;
            let freed = self.pool.insert(heap, Extent::free(unit, 1))?;
            let right = self
                .pool
                .insert(heap, Extent::used(unit + 1, extent.end() - unit - 1))?;

            self.pool.get_mut(at).length = unit - extent.start;
            self.list.insert_after(&mut self.pool, at, freed);
            self.list.insert_after(&mut self.pool, freed, right);
        }

        self.free_units += 1;
        self.next_free = self.next_free.min(unit);
        trace!("physmem: freed unit {unit} at {:#x}", self.address_of(unit));
        Ok(())
    }

    /// Merges `victim` into `keep`, its left neighbour, and drops its node.
    fn absorb(&mut self, keep: usize, victim: usize) -> usize {
        let length = self.pool.get(victim).length;
        self.pool.get_mut(keep).length += length;
        self.list.remove(&mut self.pool, victim);
        self.pool.release(victim);
        keep
    }

    /// First free extent with at least `units` units, skipping the used
    /// prefix. Also tells whether a smaller free extent was passed on the way.
    fn find_fit(&self, units: u32) -> Option<(usize, bool)> {
        let mut passed_free = false;

        for at in self.list.iter(&self.pool) {
            let extent = self.pool.get(at);
            if extent.end() <= self.next_free || !extent.is_free() {
                continue;
            }
            if extent.length >= units {
                return Some((at, passed_free));
            }
            passed_free = true;
        }

        None
    }

    /// Extent holding `unit`.
    fn find(&self, unit: u32) -> Option<usize> {
        self.list
            .iter(&self.pool)
            .find(|at| self.pool.get(*at).contains(unit))
    }

    fn list_prev(&self, at: usize) -> Option<usize> {
        self.pool.prev(at)
    }

    fn list_next(&self, at: usize) -> Option<usize> {
        self.pool.next(at)
    }

    /// Unit number of `addr` if a free of it is allowed.
    fn checked_unit(&self, addr: usize) -> Result<u32, PhysMemError> {
        if addr < self.watermark || !self.contains(addr) {
            warn!(
                "physmem: rejected free of {addr:#x} (watermark {:#x}, range {:#x}..{:#x})",
                self.watermark,
                self.base,
                self.end()
            );
            return Err(PhysMemError::InvalidAddress { addr });
        }
        // Below `end`, so the unit number fits.
        Ok(unit_of(addr - self.base) as u32)
    }

    #[inline]
    fn address_of(&self, unit: u32) -> usize {
        self.base + unit as usize * UNIT_SIZE
    }

    /// Address of the first managed unit.
    pub fn base(&self) -> usize {
        self.base
    }

    /// One past the last managed byte.
    pub fn end(&self) -> usize {
        self.address_of(self.total_units)
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn total_units(&self) -> usize {
        self.total_units as usize
    }

    pub fn free_units(&self) -> usize {
        self.free_units as usize
    }

    pub fn extent_count(&self) -> usize {
        self.list.len()
    }

    /// Whether `addr` lies in the managed range.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Whether the unit holding `addr` is allocated. `None` outside the range.
    pub fn is_allocated(&self, addr: usize) -> Option<bool> {
        if !self.contains(addr) {
            return None;
        }
        let unit = unit_of(addr - self.base) as u32;
        self.find(unit).map(|at| !self.pool.get(at).is_free())
    }

    /// Extents in address order.
    pub fn extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.list.iter(&self.pool).map(|at| *self.pool.get(at))
    }

    /// Address range covered by `extent`.
    pub fn extent_range(&self, extent: &Extent) -> core::ops::Range<usize> {
        self.address_of(extent.start)..self.address_of(extent.end())
    }

    /// Logs every extent at debug level.
    pub fn dump(&self) {
        debug!(
            "physmem {:#x}..{:#x}: {} of {} units free, {} extents in {} node slots",
            self.base,
            self.end(),
            self.free_units,
            self.total_units,
            self.pool.live(),
            self.pool.capacity()
        );
        for extent in self.extents() {
            let range = self.extent_range(&extent);
            debug!(
                "  {:#x}..{:#x} units {}+{} {:?}",
                range.start, range.end, extent.start, extent.length, extent.state
            );
        }
    }

    /// Gives the node storage back to `heap`.
    pub fn teardown(mut self, heap: &mut Heap) {
        self.pool.release_all(heap);
    }
}

impl fmt::Debug for PhysMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysMem")
            .field("base", &format_args!("{:#x}", self.base))
            .field("total_units", &self.total_units)
            .field("free_units", &self.free_units)
            .field("extents", &self.list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: usize = 0x10_0000;

    fn unit(n: usize) -> usize {
        START + n * UNIT_SIZE
    }

    /// Runs `f` with a heap for node storage and a unit allocator over
    /// `units` units at `START`.
    fn with_physmem(units: usize, f: impl FnOnce(&mut Heap, &mut PhysMem)) {
        let mut memory = vec![0u128; 0x4000];
        let len = memory.len() * 16;
        let mut heap = unsafe { Heap::create(memory.as_mut_ptr().cast(), len).unwrap() };
        let mut physmem = PhysMem::setup(&mut heap, START, units * UNIT_SIZE).unwrap();
        f(&mut heap, &mut physmem);
        check(&physmem);
        physmem.teardown(&mut heap);
        assert_eq!(heap.stats().used_regions, 0);
    }

    fn check(physmem: &PhysMem) {
        let extents: Vec<_> = physmem.extents().collect();
        assert_eq!(extents.len(), physmem.extent_count());

        let mut expected_start = 0;
        for extent in &extents {
            assert_eq!(extent.start, expected_start, "gap or overlap: {extents:?}");
            assert!(extent.length > 0);
            expected_start = extent.end();
        }
        assert_eq!(expected_start as usize, physmem.total_units());

        let free: u32 = extents.iter().filter(|e| e.is_free()).map(|e| e.length).sum();
        assert_eq!(free as usize, physmem.free_units());

        for pair in extents.windows(2) {
            assert!(
                !(pair[0].is_free() && pair[1].is_free()),
                "adjacent free extents: {extents:?}"
            );
        }
    }

    fn extents(physmem: &PhysMem) -> Vec<Extent> {
        physmem.extents().collect()
    }

    #[test]
    fn setup_rounds_inwards() {
        let mut memory = vec![0u128; 0x1000];
        let len = memory.len() * 16;
        let mut heap = unsafe { Heap::create(memory.as_mut_ptr().cast(), len).unwrap() };

        let physmem = PhysMem::setup(&mut heap, START + 1, 4 * UNIT_SIZE).unwrap();
        assert_eq!(physmem.base(), START + UNIT_SIZE);
        assert_eq!(physmem.total_units(), 3);
        assert_eq!(extents(&physmem), vec![Extent::free(0, 3)]);
        physmem.teardown(&mut heap);

        assert!(matches!(
            PhysMem::setup(&mut heap, START + 1, UNIT_SIZE),
            Err(PhysMemError::EmptyRange)
        ));
        assert!(matches!(
            PhysMem::setup(&mut heap, usize::MAX - 10, 100),
            Err(PhysMemError::RangeTooLarge)
        ));
    }

    #[test]
    fn first_fit_allocation() {
        with_physmem(20, |heap, physmem| {
            assert_eq!(physmem.allocate_region(heap, 5).unwrap(), unit(0));
            assert_eq!(physmem.allocate_unit(heap).unwrap(), unit(5));
            assert_eq!(
                extents(physmem),
                vec![Extent::used(0, 5), Extent::used(5, 1), Extent::free(6, 14)]
            );
            assert_eq!(physmem.free_units(), 14);
        });
    }

    #[test]
    fn allocation_errors() {
        with_physmem(4, |heap, physmem| {
            assert_eq!(physmem.allocate_region(heap, 0), Err(PhysMemError::ZeroLength));
            assert_eq!(
                physmem.allocate_region(heap, 5),
                Err(PhysMemError::OutOfMemory {
                    requested: 5,
                    available: 4
                })
            );

            // Enough units in total but not in one run.
            physmem.allocate_region(heap, 4).unwrap();
            physmem.free_unit(heap, unit(1)).unwrap();
            physmem.free_unit(heap, unit(3)).unwrap();
            assert_eq!(
                physmem.allocate_region(heap, 2),
                Err(PhysMemError::OutOfMemory {
                    requested: 2,
                    available: 2
                })
            );
        });
    }

    #[test]
    fn exact_fit_flips_in_place() {
        with_physmem(3, |heap, physmem| {
            physmem.allocate_region(heap, 3).unwrap();
            assert_eq!(extents(physmem), vec![Extent::used(0, 3)]);
        });
    }

    #[test]
    fn free_middle_unit_splits_in_three() {
        with_physmem(10, |heap, physmem| {
            let addr = physmem.allocate_region(heap, 10).unwrap();
            physmem.free_unit(heap, addr + 5 * UNIT_SIZE).unwrap();
            assert_eq!(
                extents(physmem),
                vec![Extent::used(0, 5), Extent::free(5, 1), Extent::used(6, 4)]
            );
        });
    }

    #[test]
    fn free_single_unit_extent() {
        // Neither neighbour free.
        with_physmem(3, |heap, physmem| {
            for _ in 0..3 {
                physmem.allocate_unit(heap).unwrap();
            }
            physmem.free_unit(heap, unit(1)).unwrap();
            assert_eq!(
                extents(physmem),
                vec![Extent::used(0, 1), Extent::free(1, 1), Extent::used(2, 1)]
            );
        });

        // Left neighbour free.
        with_physmem(3, |heap, physmem| {
            for _ in 0..3 {
                physmem.allocate_unit(heap).unwrap();
            }
            physmem.free_unit(heap, unit(0)).unwrap();
            physmem.free_unit(heap, unit(1)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::free(0, 2), Extent::used(2, 1)]);
        });

        // Right neighbour free.
        with_physmem(3, |heap, physmem| {
            for _ in 0..3 {
                physmem.allocate_unit(heap).unwrap();
            }
            physmem.free_unit(heap, unit(2)).unwrap();
            physmem.free_unit(heap, unit(1)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::used(0, 1), Extent::free(1, 2)]);
        });

        // Both neighbours free.
        with_physmem(3, |heap, physmem| {
            for _ in 0..3 {
                physmem.allocate_unit(heap).unwrap();
            }
            physmem.free_unit(heap, unit(0)).unwrap();
            physmem.free_unit(heap, unit(2)).unwrap();
            physmem.free_unit(heap, unit(1)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::free(0, 3)]);
            assert_eq!(physmem.extent_count(), 1);
        });
    }

    #[test]
    fn free_first_unit_of_extent() {
        // No free left neighbour: a new node is carved off.
        with_physmem(4, |heap, physmem| {
            physmem.allocate_region(heap, 4).unwrap();
            physmem.free_unit(heap, unit(0)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::free(0, 1), Extent::used(1, 3)]);
        });

        // Free left neighbour grows.
        with_physmem(5, |heap, physmem| {
            physmem.allocate_unit(heap).unwrap();
            physmem.allocate_region(heap, 4).unwrap();
            physmem.free_unit(heap, unit(0)).unwrap();
            physmem.free_unit(heap, unit(1)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::free(0, 2), Extent::used(2, 3)]);
        });
    }

    #[test]
    fn free_last_unit_of_extent() {
        // Free right neighbour grows downwards.
        with_physmem(6, |heap, physmem| {
            physmem.allocate_region(heap, 4).unwrap();
            physmem.free_unit(heap, unit(3)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::used(0, 3), Extent::free(3, 3)]);
        });

        // Used right neighbour: a new node is linked after.
        with_physmem(6, |heap, physmem| {
            physmem.allocate_region(heap, 4).unwrap();
            physmem.allocate_region(heap, 2).unwrap();
            physmem.free_unit(heap, unit(3)).unwrap();
            assert_eq!(
                extents(physmem),
                vec![Extent::used(0, 3), Extent::free(3, 1), Extent::used(4, 2)]
            );
        });

        // Extent at the end of the range.
        with_physmem(4, |heap, physmem| {
            physmem.allocate_region(heap, 4).unwrap();
            physmem.free_unit(heap, unit(3)).unwrap();
            assert_eq!(extents(physmem), vec![Extent::used(0, 3), Extent::free(3, 1)]);
        });
    }

    #[test]
    fn rejected_frees_change_nothing() {
        let mut memory = vec![0u128; 0x1000];
        let len = memory.len() * 16;
        let mut heap = unsafe { Heap::create(memory.as_mut_ptr().cast(), len).unwrap() };
        let mut physmem =
            PhysMem::setup_with_watermark(&mut heap, START, 8 * UNIT_SIZE, unit(2)).unwrap();

        // Everything free.
        assert_eq!(
            physmem.free_unit(&mut heap, unit(4)),
            Err(PhysMemError::NotAllocated { addr: unit(4) })
        );

        physmem.allocate_region(&mut heap, 4).unwrap();
        let before = extents(&physmem);
        assert_eq!(physmem.is_allocated(unit(1)), Some(true));
        assert_eq!(physmem.is_allocated(unit(3) + 100), Some(true));
        assert_eq!(physmem.is_allocated(unit(4)), Some(false));
        assert_eq!(physmem.is_allocated(unit(8)), None);
        assert_eq!(physmem.is_allocated(START - 1), None);

        for addr in [START - UNIT_SIZE, unit(1), unit(8), usize::MAX] {
            assert_eq!(
                physmem.free_unit(&mut heap, addr),
                Err(PhysMemError::InvalidAddress { addr })
            );
        }
        assert_eq!(
            physmem.free_unit(&mut heap, unit(6)),
            Err(PhysMemError::NotAllocated { addr: unit(6) })
        );

        assert_eq!(extents(&physmem), before);
        assert_eq!(physmem.free_units(), 4);
        check(&physmem);
        physmem.teardown(&mut heap);
    }

    #[test]
    fn unaligned_address_frees_its_unit() {
        with_physmem(2, |heap, physmem| {
            let addr = physmem.allocate_unit(heap).unwrap();
            physmem.free_unit(heap, addr + 123).unwrap();
            assert_eq!(extents(physmem), vec![Extent::free(0, 2)]);
        });
    }

    #[test]
    fn free_region_skips_free_units() {
        with_physmem(10, |heap, physmem| {
            let addr = physmem.allocate_region(heap, 10).unwrap();
            physmem.free_unit(heap, unit(4)).unwrap();

            assert_eq!(physmem.free_region(heap, addr + 2 * UNIT_SIZE, 5), Ok(4));
            assert_eq!(
                extents(physmem),
                vec![Extent::used(0, 2), Extent::free(2, 5), Extent::used(7, 3)]
            );
            assert_eq!(physmem.free_region(heap, addr + 2 * UNIT_SIZE, 5), Ok(0));

            assert_eq!(physmem.free_region(heap, addr, 10), Ok(5));
            assert_eq!(extents(physmem), vec![Extent::free(0, 10)]);
        });
    }

    #[test]
    fn free_region_checks_bounds_first() {
        with_physmem(4, |heap, physmem| {
            let addr = physmem.allocate_region(heap, 4).unwrap();
            assert_eq!(
                physmem.free_region(heap, addr + UNIT_SIZE, 4),
                Err(PhysMemError::InvalidAddress {
                    addr: addr + 4 * UNIT_SIZE
                })
            );
            assert_eq!(physmem.free_units(), 0);
            assert_eq!(physmem.free_region(heap, addr, 0), Err(PhysMemError::ZeroLength));
        });
    }

    #[test]
    fn byte_counts_round_up_to_units() {
        with_physmem(8, |heap, physmem| {
            let addr = physmem.allocate_region_bytes(heap, UNIT_SIZE + 1).unwrap();
            assert_eq!(extents(physmem)[0], Extent::used(0, 2));

            // An empty byte range frees nothing, aligned or not.
            assert_eq!(physmem.free_region_bytes(heap, addr, 0), Err(PhysMemError::ZeroLength));
            assert_eq!(
                physmem.free_region_bytes(heap, addr + 10, 0),
                Err(PhysMemError::ZeroLength)
            );
            assert_eq!(physmem.free_units(), 6);

            assert_eq!(physmem.free_region_bytes(heap, addr + 10, UNIT_SIZE), Ok(2));
            assert_eq!(extents(physmem), vec![Extent::free(0, 8)]);
        });
    }

    #[test]
    fn exhaustion_and_reuse() {
        with_physmem(6, |heap, physmem| {
            let units: Vec<_> = (0..6).map(|_| physmem.allocate_unit(heap).unwrap()).collect();
            assert_eq!(units, (0..6).map(unit).collect::<Vec<_>>());
            assert!(matches!(
                physmem.allocate_unit(heap),
                Err(PhysMemError::OutOfMemory { .. })
            ));

            physmem.free_unit(heap, unit(3)).unwrap();
            assert_eq!(physmem.allocate_unit(heap), Ok(unit(3)));
        });
    }

    #[test]
    fn allocate_then_free_restores_the_list() {
        with_physmem(16, |heap, physmem| {
            physmem.allocate_region(heap, 3).unwrap();
            let hole = physmem.allocate_region(heap, 2).unwrap();
            physmem.allocate_region(heap, 4).unwrap();
            physmem.free_region(heap, hole, 2).unwrap();

            let before = extents(physmem);
            let addr = physmem.allocate_unit(heap).unwrap();
            assert_eq!(addr, hole);
            physmem.free_unit(heap, addr).unwrap();
            assert_eq!(extents(physmem), before);
        });
    }

    #[test]
    fn hint_does_not_skip_freed_units() {
        with_physmem(8, |heap, physmem| {
            for _ in 0..4 {
                physmem.allocate_unit(heap).unwrap();
            }
            physmem.free_unit(heap, unit(1)).unwrap();
            // A run of two does not fit the hole, so it comes after.
            assert_eq!(physmem.allocate_region(heap, 2), Ok(unit(4)));
            // The hole is still found.
            assert_eq!(physmem.allocate_unit(heap), Ok(unit(1)));
            assert_eq!(physmem.allocate_unit(heap), Ok(unit(6)));
        });
    }

    #[test]
    fn random_sequence_keeps_invariants() {
        with_physmem(64, |heap, physmem| {
            let mut seed = 0x2545_f491_u64;
            let mut next = move || {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                seed
            };

            let mut live: Vec<(usize, usize)> = Vec::new();
            for _ in 0..600 {
                let roll = next();
                if roll % 3 != 0 || live.is_empty() {
                    let units = (roll >> 8) as usize % 5 + 1;
                    if let Ok(addr) = physmem.allocate_region(heap, units) {
                        live.push((addr, units));
                    }
                } else {
                    let (addr, units) = live.swap_remove((roll >> 8) as usize % live.len());
                    if roll & 0x10 == 0 {
                        assert_eq!(physmem.free_region(heap, addr, units), Ok(units));
                    } else {
                        // Free the units in a scattered order.
                        let evens = (0..units).rev().step_by(2);
                        let odds = (0..units).rev().skip(1).step_by(2);
                        for i in evens.chain(odds) {
                            physmem.free_unit(heap, addr + i * UNIT_SIZE).unwrap();
                        }
                    }
                }
                check(physmem);
            }

            for (addr, units) in live {
                physmem.free_region(heap, addr, units).unwrap();
            }
            assert_eq!(extents(physmem), vec![Extent::free(0, 64)]);
        });
    }
}
