/// Index of a node inside its [`NodeStore`]. `None` marks the end of the list.
pub(crate) type Link = Option<usize>;

/// Storage that owns the nodes of a [`List`].
///
/// The list itself only keeps indices, the links live inside the nodes.
/// For the unit allocator an index is a slot of the extent pool, for the
/// heap it is the byte offset of a block header from the heap base.
pub(crate) trait NodeStore {
    fn next(&self, at: usize) -> Link;
    fn prev(&self, at: usize) -> Link;
    fn set_next(&mut self, at: usize, link: Link);
    fn set_prev(&mut self, at: usize, link: Link);
}

/// Doubly linked list over nodes owned by a [`NodeStore`].
///
/// None of the operations allocate. Inserting a node means linking a slot
/// that the caller already owns and initialized.
#[derive(Debug)]
pub(crate) struct List {
    head: Link,
    tail: Link,
    len: usize,
}

pub(crate) struct Iter<'a, S> {
    store: &'a S,
    current: Link,
    remaining: usize,
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `at` in front of the current head.
    pub fn push_front<S: NodeStore>(&mut self, store: &mut S, at: usize) {
        store.set_prev(at, None);
        store.set_next(at, self.head);

        match self.head {
            Some(head) => store.set_prev(head, Some(at)),
            None => self.tail = Some(at),
        }

        self.head = Some(at);
        self.len += 1;
    }

    /// Links `at` after the current tail.
    pub fn push_back<S: NodeStore>(&mut self, store: &mut S, at: usize) {
        match self.tail {
            Some(tail) => self.insert_after(store, tail, at),
            None => self.push_front(store, at),
        }
    }

    /// Links `new` right after `at`, which must already be in this list.
    pub fn insert_after<S: NodeStore>(&mut self, store: &mut S, at: usize, new: usize) {
        let next = store.next(at);

        store.set_prev(new, Some(at));
        store.set_next(new, next);
        store.set_next(at, Some(new));

        match next {
            Some(next) => store.set_prev(next, Some(new)),
            None => self.tail = Some(new),
        }

        self.len += 1;
    }

    /// Links `new` right before `at`, which must already be in this list.
    pub fn insert_before<S: NodeStore>(&mut self, store: &mut S, at: usize, new: usize) {
        match store.prev(at) {
            Some(prev) => self.insert_after(store, prev, new),
            None => self.push_front(store, new),
        }
    }

    /// Unlinks `at`. The slot itself is left to the caller.
    pub fn remove<S: NodeStore>(&mut self, store: &mut S, at: usize) {
        let prev = store.prev(at);
        let next = store.next(at);

        match prev {
            Some(prev) => store.set_next(prev, next),
            None => self.head = next,
        }

        match next {
            Some(next) => store.set_prev(next, prev),
            None => self.tail = prev,
        }

        store.set_prev(at, None);
        store.set_next(at, None);
        self.len -= 1;
    }

    pub fn iter<'a, S: NodeStore>(&self, store: &'a S) -> Iter<'a, S> {
        Iter {
            store,
            current: self.head,
            remaining: self.len,
        }
    }
}

impl<S: NodeStore> Iterator for Iter<'_, S> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.current?;

        self.current = self.store.next(at);
        self.remaining = self.remaining.saturating_sub(1);

        Some(at)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
