use log::trace;

use crate::{
    block::{Block, FOOTER_SIZE, HEADER_SIZE, erase_footer, read_footer},
    heap::HeapControl,
};

impl HeapControl {
    /// Shrinks the used `block` to `size` bytes and turns what is left into
    /// a new free block right after it.
    ///
    /// ```text
    /// +--------+------+--------+        +--------+------+--------+--------+------+--------+
    /// | header | size + rest   | footer | -> | header | size | footer | header | rest | footer |
    /// +--------+------+--------+        +--------+------+--------+--------+------+--------+
    /// ```
    ///
    /// When the remainder ends at `top` and the free list is already longer
    /// than the configured limit, the remainder is not listed: `top` moves
    /// back to the end of `block` instead.
    pub(crate) fn split(&mut self, block: Block, size: usize) {
        let old_limit = block.limit();
        let old_footer = block.footer_addr();

        block.set_limit(size);
        // SAFETY: the new footer lies inside the old payload.
        unsafe { block.seal() };

        let rest_addr = block.end();
        let rest_limit = old_limit - size - FOOTER_SIZE - HEADER_SIZE;
        // SAFETY: the remainder covers exactly the rest of the old block and
        // its footer lands on the old footer.
        let rest = unsafe { Block::write(rest_addr, rest_limit) };
        debug_assert_eq!(rest.footer_addr(), old_footer);

        if rest.end() == self.top && self.free.len() > self.config.free_regions_limit {
            trace!(
                "heap top contracted from {:#x} to {:#x} ({} free blocks)",
                self.top,
                rest_addr,
                self.free.len()
            );
            rest.erase();
            // SAFETY: the old footer now belongs to the dropped remainder.
            unsafe { erase_footer(old_footer) };
            self.top = rest_addr;
        } else {
            self.free.insert_free_block(self.arena(), rest);
        }
    }

    /// Tries to merge `block` with the block right before it. This can be
    /// performed if that previous block is free.
    ///
    /// Returns the block that now covers `block`: the previous one when the
    /// merge happened, `block` itself otherwise. Either way the result is not
    /// on the free list.
    pub(crate) fn merge_with_prev(&mut self, block: Block) -> Block {
        if block.addr() < self.base + self.min_block_size() {
            return block;
        }

        // SAFETY: there is room for a whole block below `block`, so the
        // footer slot right before it is heap memory.
        let footer = unsafe { read_footer(block.addr() - FOOTER_SIZE) };

        let Some(prev) = self.validate(footer.header) else {
            return block;
        };
        if prev.is_used() || prev.end() != block.addr() || footer.base != prev.base() {
            return block;
        }

        // The previous block sits on the free list, it leaves it now and the
        // merged block is listed (or dropped) by the caller.
        self.free.remove_free_block(self.arena(), prev);

        prev.set_limit(prev.limit() + FOOTER_SIZE + HEADER_SIZE + block.limit());
        // SAFETY: both footers are inside the merged block.
        unsafe {
            erase_footer(block.addr() - FOOTER_SIZE);
            prev.seal();
        }
        block.erase();

        prev
    }

    /// Tries to merge `block` with the block right after it. This can be
    /// performed if that next block is free.
    pub(crate) fn merge_with_next(&mut self, block: Block) {
        let next_addr = block.end();
        if next_addr >= self.top {
            return;
        }

        let Some(next) = self.validate(next_addr) else {
            return;
        };
        if next.is_used() {
            return;
        }

        self.free.remove_free_block(self.arena(), next);

        let old_footer = block.footer_addr();
        block.set_limit(block.limit() + FOOTER_SIZE + HEADER_SIZE + next.limit());
        // SAFETY: the new footer is the one `next` used, the old one is
        // inside the merged payload.
        unsafe {
            block.seal();
            erase_footer(old_footer);
        }
        next.erase();
    }
}
