//! Dynamic memory core of a small single address space kernel.
//!
//! One physical extent found at boot is turned into two allocators:
//!
//! - [`Heap`]: a boundary-tagged heap handing out byte sized blocks from a
//!   fixed arena. Every block is bracketed by a header and a footer, so a
//!   freed block finds and merges with its neighbours without any index.
//! - [`PhysMem`]: a unit allocator handing out [`UNIT_SIZE`] byte units or
//!   contiguous runs of them. It describes its range as a doubly linked list
//!   of free and used extents, and its list nodes are allocated from the
//!   heap.
//!
//! [`Kernel`] wires both together on a [`BootExtent`], [`LockedHeap`] and
//! [`LockedKernel`] add the lock needed to share them.
//!
//! ```text
//!  BootExtent
//!  +---------------------------+----------------------------------------+
//!  | Heap                      | PhysMem units                          |
//!  | +-----+-------+-------+   | +--------+------+------------+------+  |
//!  | | ctl | Block | Block |.. | |  Used  | Free |    Used    | Free |  |
//!  | +-----+-------+-------+   | +--------+------+------------+------+  |
//!  +---------------------------+----------------------------------------+
//!        ^ extent nodes live here
//! ```
//!
//! Nothing in here allocates through the global allocator, the crate is
//! `no_std`.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod block;
mod bootmem;
mod config;
mod error;
mod extent;
mod freelist;
mod heap;
mod kernel;
mod list;
mod locked;
mod physmem;
#[cfg(any(unix, windows))]
mod platform;
mod region;
mod utils;

pub use bootmem::{BootExtent, KernelImage, MemoryMapEntry, RegionKind, select_extent};
pub use config::{
    AVG_ALLOC_SIZE, FREE_MEMREGS_LIMIT, HeapConfig, KERNEL_HEAP_SIZE, MEMREG_GRANULARITY,
    MemoryConfig, UNIT_SIZE,
};
pub use error::{HeapError, MemoryError, PhysMemError};
pub use extent::{Extent, ExtentState};
pub use heap::{Heap, HeapStats, RegionInfo, min_heap_size};
pub use kernel::Kernel;
pub use locked::{LockedHeap, LockedKernel};
pub use physmem::PhysMem;
#[cfg(any(unix, windows))]
pub use platform::{Host, HostArena, PlatformMemory};
pub use utils::units_for_bytes;
