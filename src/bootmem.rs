//! What the boot loader tells us about physical memory.
//!
//! The loader hands over a memory map and the placement of the kernel image
//! and its modules. [`select_extent`] turns that into the single
//! [`BootExtent`] the memory core is built on.

use log::{debug, trace};

use crate::{config::UNIT_SIZE, utils::align};

/// Kind of a memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Available,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    Defective,
}

impl RegionKind {
    /// Maps a multiboot memory map `type` field. Unknown values are reserved.
    pub const fn from_multiboot(kind: u32) -> Self {
        match kind {
            1 => Self::Available,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::Defective,
            _ => Self::Reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub base: usize,
    pub length: usize,
    pub kind: RegionKind,
}

impl MemoryMapEntry {
    pub const fn new(base: usize, length: usize, kind: RegionKind) -> Self {
        Self { base, length, kind }
    }

    pub const fn end(&self) -> usize {
        self.base.saturating_add(self.length)
    }
}

/// Where the kernel image (and the modules loaded behind it) live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImage {
    /// Load address of the kernel.
    pub start: usize,
    /// End of the kernel, bss included.
    pub end: usize,
    /// End of the last module, `0` when no module was loaded.
    pub modules_end: usize,
}

impl KernelImage {
    /// First unit boundary past the kernel and its modules.
    pub const fn footprint_end(&self) -> usize {
        let end = if self.modules_end > self.end {
            self.modules_end
        } else {
            self.end
        };
        align(end, UNIT_SIZE)
    }
}

/// Physical memory handed to the memory core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootExtent {
    pub start: usize,
    pub length: usize,
    /// Frees below this address are refused.
    pub watermark: usize,
}

impl BootExtent {
    pub const fn new(start: usize, length: usize) -> Self {
        Self {
            start,
            length,
            watermark: start,
        }
    }

    pub const fn with_watermark(mut self, watermark: usize) -> Self {
        self.watermark = watermark;
        self
    }

    pub const fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Picks the largest available entry that starts at or above the kernel
/// load address.
///
/// If the kernel ends inside an entry, only the part after the kernel (and
/// after its modules, when they end inside the same entry) is usable.
pub fn select_extent(map: &[MemoryMapEntry], image: &KernelImage) -> Option<BootExtent> {
    let mut best: Option<BootExtent> = None;

    for entry in map {
        trace!(
            "memory map: {:#x}..{:#x} {:?}",
            entry.base,
            entry.end(),
            entry.kind
        );

        if entry.kind != RegionKind::Available || entry.base < image.start {
            continue;
        }

        let mut start = entry.base;
        if image.end >= entry.base && image.end <= entry.end() {
            start = image.end;
            if image.modules_end > 0
                && image.modules_end >= start
                && image.modules_end <= entry.end()
            {
                start = image.modules_end;
            }
        }

        let length = entry.end() - start;
        if length > best.map_or(0, |best| best.length) {
            best = Some(BootExtent::new(start, length));
        }
    }

    let extent = best?.with_watermark(image.footprint_end());
    debug!(
        "boot extent {:#x}..{:#x}, watermark {:#x}",
        extent.start,
        extent.end(),
        extent.watermark
    );
    Some(extent)
}
