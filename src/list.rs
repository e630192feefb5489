//! Doubly linked lists threaded through the entry arena by index.
//!
//! Every entry carries two links: one for the active or free list and one
//! for its hash bucket. A list only stores its ends; the links live in the
//! entries themselves.

use crate::entry::{EntryId, LroEntry};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Link {
    pub(crate) prev: Option<EntryId>,
    pub(crate) next: Option<EntryId>,
}

/// Which of an entry's two links a list is threaded through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Membership {
    /// The active list or the free list.
    Queue,
    /// A hash bucket chain.
    Bucket,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct List {
    head: Option<EntryId>,
    tail: Option<EntryId>,
    len: usize,
    membership: Membership,
}

impl List {
    pub(crate) fn new(membership: Membership) -> Self {
        List {
            head: None,
            tail: None,
            len: 0,
            membership,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn head(&self) -> Option<EntryId> {
        self.head
    }

    pub(crate) fn tail(&self) -> Option<EntryId> {
        self.tail
    }

    pub(crate) fn push_front(&mut self, entries: &mut [LroEntry], id: EntryId) {
        let m = self.membership;
        let old = self.head;
        *entries[id.index()].link_mut(m) = Link {
            prev: None,
            next: old,
        };
        match old {
            Some(head) => entries[head.index()].link_mut(m).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Unlinks `id`, which must be a member of this list.
    pub(crate) fn remove(&mut self, entries: &mut [LroEntry], id: EntryId) {
        let m = self.membership;
        let Link { prev, next } = std::mem::take(entries[id.index()].link_mut(m));
        match prev {
            Some(prev) => entries[prev.index()].link_mut(m).next = next,
            None => {
                debug_assert_eq!(self.head, Some(id), "entry {id:?} is not on this list");
                self.head = next;
            }
        }
        match next {
            Some(next) => entries[next.index()].link_mut(m).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, entries: &mut [LroEntry]) -> Option<EntryId> {
        let id = self.head?;
        self.remove(entries, id);
        Some(id)
    }

    /// Moves a member to the front.
    pub(crate) fn move_to_front(&mut self, entries: &mut [LroEntry], id: EntryId) {
        if self.head != Some(id) {
            self.remove(entries, id);
            self.push_front(entries, id);
        }
    }

    /// Iterates front to back.
    pub(crate) fn iter<'a>(&self, entries: &'a [LroEntry]) -> impl Iterator<Item = EntryId> + 'a {
        let m = self.membership;
        std::iter::successors(self.head, move |id| entries[id.index()].link(m).next)
    }
}
