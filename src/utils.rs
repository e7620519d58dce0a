//! Helper functions shared by the heap and the unit allocator.
//! None of them belong to a concrete data structure.

use crate::config::UNIT_SIZE;

/// It aligns `to_be_aligned` up to the next multiple of `aligment`, which
/// must be a power of two.
///
/// This is used to round request sizes to the heap granularity and to keep
/// boundary tags on aligned addresses.
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around.
pub const fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(aligment - 1) {
        Some(bumped) => Some(bumped & !(aligment - 1)),
        None => None,
    }
}

/// Rounds `addr` down to a multiple of `aligment` (power of two).
pub const fn align_down(addr: usize, aligment: usize) -> usize {
    addr & !(aligment - 1)
}

/// Number of whole units needed to cover `bytes`.
pub const fn units_for_bytes(bytes: usize) -> usize {
    bytes.div_ceil(UNIT_SIZE)
}

/// Unit index that contains `addr`.
pub const fn unit_of(addr: usize) -> usize {
    addr / UNIT_SIZE
}
