use crate::{
    block::Block,
    list::{Link, List, NodeStore},
};

/// The heap bytes seen as storage for free list nodes.
///
/// Free blocks are linked through their own headers, so the list needs no
/// memory of its own. A node index is the offset of a header from `base`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arena {
    pub base: usize,
}

impl Arena {
    #[inline]
    pub fn block(&self, at: usize) -> Block {
        // SAFETY: only offsets of live headers are ever linked.
        unsafe { Block::at(self.base + at) }
    }

    #[inline]
    pub fn offset(&self, block: Block) -> usize {
        block.addr() - self.base
    }
}

impl NodeStore for Arena {
    fn next(&self, at: usize) -> Link {
        self.block(at).next()
    }

    fn prev(&self, at: usize) -> Link {
        self.block(at).prev()
    }

    fn set_next(&mut self, at: usize, link: Link) {
        self.block(at).set_next(link);
    }

    fn set_prev(&mut self, at: usize, link: Link) {
        self.block(at).set_prev(link);
    }
}

/// List of free heap blocks.
///
/// It is not sorted in any way: new and merged blocks are pushed at the
/// front, so recently freed memory is found first.
///
/// ```text
///                         Free List
///
///        +----------------------------------------------+
///        |                                              |
/// +------|-------+     +-------------+     +------------|-+
/// | Block (free) | --> | Block (used)| --> | Block (free) |
/// +--------------+     +-------------+     +--------------+
///          heap.base  ------------------------->  heap.top
/// ```
///
/// Used blocks never appear here, they are only reachable through the
/// pointer that was handed out for them.
#[derive(Debug)]
pub(crate) struct FreeList {
    items: List,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { items: List::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Marks `block` free and puts it at the front of the list.
    pub fn insert_free_block(&mut self, mut arena: Arena, block: Block) {
        block.set_used(false);
        let at = arena.offset(block);
        self.items.push_front(&mut arena, at);
    }

    /// Unlinks `block`, which must currently be on the list.
    pub fn remove_free_block(&mut self, mut arena: Arena, block: Block) {
        let at = arena.offset(block);
        self.items.remove(&mut arena, at);
    }

    /// First-fit: returns the first block whose payload can hold `size`
    /// bytes. `size` is expected to be rounded to the heap granularity.
    pub fn find_free_block(&self, arena: Arena, size: usize) -> Option<Block> {
        self.items
            .iter(&arena)
            .map(|at| arena.block(at))
            .find(|block| block.limit() >= size)
    }

    pub fn blocks(&self, arena: Arena) -> impl Iterator<Item = Block> {
        let mut current = self.items.first();
        core::iter::from_fn(move || {
            let at = current?;
            current = arena.next(at);
            Some(arena.block(at))
        })
    }
}
