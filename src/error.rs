//! Error types of the memory core.
//!
//! Every failure is reported by value. None of them leaves an allocator in
//! a different state than before the failing call.

/// Errors reported by a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("heap exhausted: cannot satisfy a request of {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("heap of {limit} bytes is below the minimum of {minimum} bytes")]
    HeapTooSmall { limit: usize, minimum: usize },
    #[error("pointer {addr:#x} does not belong to this heap")]
    InvalidPointer { addr: usize },
    #[error("boundary tags of the block at {addr:#x} are inconsistent")]
    CorruptedBoundaryTag { addr: usize },
    #[error("block at {addr:#x} is not allocated")]
    NotAllocated { addr: usize },
    #[error("granularity {granularity} is not a supported power of two")]
    InvalidConfig { granularity: usize },
    #[error("heap used before it was created")]
    Uninitialized,
}

/// Errors reported by the unit allocator ([`PhysMem`](crate::PhysMem)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhysMemError {
    #[error("out of physical memory: requested {requested} units, {available} free")]
    OutOfMemory { requested: usize, available: usize },
    #[error("address {addr:#x} is outside the managed range")]
    InvalidAddress { addr: usize },
    #[error("unit at {addr:#x} is not allocated")]
    NotAllocated { addr: usize },
    #[error("zero-length request")]
    ZeroLength,
    #[error("the physical range does not contain a whole unit")]
    EmptyRange,
    #[error("the physical range cannot be indexed with 32-bit unit numbers")]
    RangeTooLarge,
    #[error("cannot allocate extent node storage: {0}")]
    NodeStorage(HeapError),
}

/// Errors reported by the combined memory core ([`Kernel`](crate::Kernel)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    PhysMem(#[from] PhysMemError),
    #[error("boot extent of {length} bytes cannot hold the {required} byte kernel heap")]
    ExtentTooSmall { length: usize, required: usize },
    #[error("memory core used before boot")]
    Uninitialized,
}
