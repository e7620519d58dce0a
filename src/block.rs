use core::{mem, ptr::NonNull};

use crate::{list::Link, utils::align};

/// Alignment of every boundary tag and payload inside a heap.
pub(crate) const BLOCK_ALIGN: usize = 16;

/// Bytes taken by a [`Header`], padded so the payload stays aligned.
pub(crate) const HEADER_SIZE: usize = align(mem::size_of::<Header>(), BLOCK_ALIGN);

/// Bytes taken by a [`Footer`], padded so the next header stays aligned.
pub(crate) const FOOTER_SIZE: usize = align(mem::size_of::<Footer>(), BLOCK_ALIGN);

/// Header of a heap block. It is written straight into the heap bytes,
/// right before the payload it describes.
///
/// ```text
/// +---------------------+ <------+
/// |        base         |        |
/// +---------------------+        |
/// |        limit        |        |
/// +---------------------+        | -> Header
/// |      used (1b)      |        |
/// +---------------------+        |
/// |   free list links   |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        | -> `limit` bytes
/// |                     |        |
/// +---------------------+ <------+
/// |        base         |        |
/// +---------------------+        | -> Footer
/// |   header address    |        |
/// +---------------------+ <------+
/// ```
///
/// The footer repeats `base` and points back at the header. Both tags must
/// agree for the block to be considered valid, which is how a free request
/// detects a pointer that was never handed out (or memory that was
/// scribbled over).
#[repr(C)]
pub(crate) struct Header {
    /// Address of the first payload byte.
    pub base: usize,
    /// Payload size in bytes.
    pub limit: usize,
    /// Whether the block is handed out.
    pub used: bool,
    /// Free list links, as header offsets from the heap base.
    pub prev: Link,
    pub next: Link,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footer {
    /// Copy of [`Header::base`].
    pub base: usize,
    /// Address of the owning header.
    pub header: usize,
}

/// Handle to a block header living inside a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<Header>);

impl Block {
    /// Views the header at `addr`.
    ///
    /// **SAFETY**: `addr` must be non-null, aligned to [`BLOCK_ALIGN`] and
    /// have [`HEADER_SIZE`] readable and writable bytes owned by the heap.
    #[inline]
    pub unsafe fn at(addr: usize) -> Self {
        unsafe { Self(NonNull::new_unchecked(addr as *mut Header)) }
    }

    /// Writes a fresh, free and unlinked block at `addr` with a payload of
    /// `limit` bytes and seals it with a matching footer.
    ///
    /// **SAFETY**: `[addr, addr + HEADER_SIZE + limit + FOOTER_SIZE)` must be
    /// heap memory that no other live block overlaps.
    pub unsafe fn write(addr: usize, limit: usize) -> Self {
        unsafe {
            let block = Self::at(addr);
            block.0.as_ptr().write(Header {
                base: addr + HEADER_SIZE,
                limit,
                used: false,
                prev: None,
                next: None,
            });
            block.seal();
            block
        }
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Where the payload of a well-formed block starts.
    #[inline]
    pub fn payload(self) -> usize {
        self.addr() + HEADER_SIZE
    }

    #[inline]
    pub fn base(self) -> usize {
        unsafe { (*self.0.as_ptr()).base }
    }

    #[inline]
    pub fn limit(self) -> usize {
        unsafe { (*self.0.as_ptr()).limit }
    }

    #[inline]
    pub fn set_limit(self, limit: usize) {
        unsafe { (*self.0.as_ptr()).limit = limit }
    }

    #[inline]
    pub fn is_used(self) -> bool {
        unsafe { (*self.0.as_ptr()).used }
    }

    #[inline]
    pub fn set_used(self, used: bool) {
        unsafe { (*self.0.as_ptr()).used = used }
    }

    #[inline]
    pub fn prev(self) -> Link {
        unsafe { (*self.0.as_ptr()).prev }
    }

    #[inline]
    pub fn next(self) -> Link {
        unsafe { (*self.0.as_ptr()).next }
    }

    #[inline]
    pub fn set_prev(self, link: Link) {
        unsafe { (*self.0.as_ptr()).prev = link }
    }

    #[inline]
    pub fn set_next(self, link: Link) {
        unsafe { (*self.0.as_ptr()).next = link }
    }

    /// Address of the footer according to the header.
    #[inline]
    pub fn footer_addr(self) -> usize {
        self.base().wrapping_add(self.limit())
    }

    /// First byte after this block.
    #[inline]
    pub fn end(self) -> usize {
        self.footer_addr().wrapping_add(FOOTER_SIZE)
    }

    /// **SAFETY**: [`Block::footer_addr`] must lie inside the heap.
    #[inline]
    pub unsafe fn footer(self) -> Footer {
        unsafe { read_footer(self.footer_addr()) }
    }

    /// Writes the footer that matches the current header.
    ///
    /// **SAFETY**: [`Block::footer_addr`] must lie inside the heap.
    #[inline]
    pub unsafe fn seal(self) {
        unsafe {
            write_footer(
                self.footer_addr(),
                Footer {
                    base: self.base(),
                    header: self.addr(),
                },
            );
        }
    }

    /// Wipes the header so stale pointers to it no longer validate.
    #[inline]
    pub fn erase(self) {
        unsafe {
            self.0.as_ptr().write(Header {
                base: 0,
                limit: 0,
                used: false,
                prev: None,
                next: None,
            });
        }
    }
}

/// **SAFETY**: `addr` must be aligned and have [`FOOTER_SIZE`] readable bytes.
#[inline]
pub(crate) unsafe fn read_footer(addr: usize) -> Footer {
    unsafe { (addr as *const Footer).read() }
}

/// **SAFETY**: `addr` must be aligned and have [`FOOTER_SIZE`] writable bytes.
#[inline]
pub(crate) unsafe fn write_footer(addr: usize, footer: Footer) {
    unsafe { (addr as *mut Footer).write(footer) }
}

/// **SAFETY**: same as [`write_footer`].
#[inline]
pub(crate) unsafe fn erase_footer(addr: usize) {
    unsafe { write_footer(addr, Footer { base: 0, header: 0 }) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(16))]
    struct Buffer([u8; 256]);

    #[test]
    fn tag_sizes_keep_alignment() {
        assert_eq!(HEADER_SIZE % BLOCK_ALIGN, 0);
        assert_eq!(FOOTER_SIZE % BLOCK_ALIGN, 0);
        assert!(HEADER_SIZE >= mem::size_of::<Header>());
        assert!(FOOTER_SIZE >= mem::size_of::<Footer>());
    }

    #[test]
    fn write_seals_matching_footer() {
        let mut buffer = Buffer([0; 256]);
        let addr = buffer.0.as_mut_ptr() as usize;

        unsafe {
            let block = Block::write(addr, 32);

            assert_eq!(block.base(), addr + HEADER_SIZE);
            assert_eq!(block.payload(), block.base());
            assert_eq!(block.limit(), 32);
            assert!(!block.is_used());
            assert_eq!(block.end(), addr + HEADER_SIZE + 32 + FOOTER_SIZE);
            assert_eq!(
                block.footer(),
                Footer {
                    base: block.base(),
                    header: addr
                }
            );

            block.erase();
            assert_eq!(block.limit(), 0);
            assert_eq!(block.base(), 0);
        }
    }
}
