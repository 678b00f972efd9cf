use crate::Key;

use std::{ptr, sync::atomic::Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use smallvec::SmallVec;

pub(crate) const RESIZING_TAG: usize = 0b01; // set on a source bucket while its chain is being copied
pub(crate) const RESIZED_TAG: usize = 0b10; // set on a source bucket once its chain lives in the next table

/// A node of a bucket chain. Nodes are immutable once they are reachable from
/// a bucket.
#[repr(align(8))]
pub(crate) struct Entry {
    pub(crate) key: Key,
    pub(crate) value: i32,
    next: Atomic<Entry>,
}

impl Entry {
    pub(crate) fn new(key: Key, value: i32, next: Shared<'_, Entry>) -> Self {
        Self {
            key,
            value,
            next: Atomic::from(next),
        }
    }

    #[inline]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Shared<'g, Entry> {
        self.next.load(Ordering::Acquire, guard)
    }
}

/// The decoded state of a bucket pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot<'g> {
    Empty,
    Chain(Shared<'g, Entry>),
    Resizing,
    Resized,
}

impl<'g> Slot<'g> {
    #[inline]
    pub(crate) fn decode(ptr: Shared<'g, Entry>) -> Self {
        match ptr.tag() {
            RESIZING_TAG => Self::Resizing,
            RESIZED_TAG => Self::Resized,
            _ if ptr.is_null() => Self::Empty,
            _ => Self::Chain(ptr),
        }
    }
}

#[inline]
pub(crate) fn resizing<'g>() -> Shared<'g, Entry> {
    Shared::null().with_tag(RESIZING_TAG)
}

#[inline]
pub(crate) fn resized<'g>() -> Shared<'g, Entry> {
    Shared::null().with_tag(RESIZED_TAG)
}

/// Walks a chain, yielding each node together with its pointer.
pub(crate) struct Chain<'g> {
    next: Shared<'g, Entry>,
    guard: &'g Guard,
}

impl<'g> Chain<'g> {
    pub(crate) fn new(head: Shared<'g, Entry>, guard: &'g Guard) -> Self {
        Self { next: head, guard }
    }
}

impl<'g> Iterator for Chain<'g> {
    type Item = (Shared<'g, Entry>, &'g Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.next;
        // SAFETY: Nodes are destroyed only through the epoch collector after
        // they were unlinked, so every node reachable while `guard` is pinned
        // stays allocated until it unpins.
        let entry = unsafe { ptr.as_ref() }?;
        self.next = entry.next(self.guard);
        Some((ptr, entry))
    }
}

pub(crate) fn find<'g>(head: Shared<'g, Entry>, key: Key, guard: &'g Guard) -> Option<&'g Entry> {
    Chain::new(head, guard)
        .map(|(_, entry)| entry)
        .find(|entry| entry.key == key)
}

/// A chain derived from an existing one by copying the nodes in front of a
/// target node. Only the first `fresh` nodes belong to the splice; the rest is
/// shared with the chain it was derived from.
pub(crate) struct Splice<'g> {
    pub(crate) head: Shared<'g, Entry>,
    fresh: usize,
}

impl<'g> Splice<'g> {
    /// Builds a copy of the chain starting at `head` with `target` excised.
    /// Nodes before `target` are copied in order, nodes after it are reused.
    pub(crate) fn without(head: Shared<'g, Entry>, target: &Entry, guard: &'g Guard) -> Self {
        let prefix: SmallVec<[&Entry; 8]> = Chain::new(head, guard)
            .map(|(_, entry)| entry)
            .take_while(|entry| !ptr::eq(*entry, target))
            .collect();

        let mut new_head = target.next(guard);
        for entry in prefix.iter().rev() {
            new_head = Owned::new(Entry::new(entry.key, entry.value, new_head)).into_shared(guard);
        }

        Self {
            head: new_head,
            fresh: prefix.len(),
        }
    }

    pub(crate) fn push_front(self, key: Key, value: i32, guard: &'g Guard) -> Self {
        Self {
            head: Owned::new(Entry::new(key, value, self.head)).into_shared(guard),
            fresh: self.fresh + 1,
        }
    }

    /// Frees the nodes allocated for this splice.
    ///
    /// # Safety
    ///
    /// The splice must never have been published to a bucket.
    pub(crate) unsafe fn discard(self, guard: &'g Guard) {
        let mut ptr = self.head;
        for _ in 0..self.fresh {
            let next = ptr.deref().next(guard);
            drop(ptr.into_owned());
            ptr = next;
        }
    }
}

/// Hands every node from `head` through `last` (inclusive) to the epoch
/// collector.
///
/// # Safety
///
/// Those nodes must no longer be reachable from any bucket.
pub(crate) unsafe fn defer_destroy_through<'g>(
    guard: &'g Guard,
    head: Shared<'g, Entry>,
    last: &Entry,
) {
    for (ptr, entry) in Chain::new(head, guard) {
        let is_last = ptr::eq(entry, last);
        guard.defer_destroy(ptr);
        if is_last {
            break;
        }
    }
}

/// Hands a whole chain to the epoch collector and returns its length.
///
/// # Safety
///
/// The chain must no longer be reachable from any bucket.
pub(crate) unsafe fn defer_destroy_chain<'g>(guard: &'g Guard, head: Shared<'g, Entry>) -> usize {
    let mut count = 0;
    for (ptr, _) in Chain::new(head, guard) {
        guard.defer_destroy(ptr);
        count += 1;
    }
    count
}

/// Frees a whole chain immediately.
///
/// # Safety
///
/// No other thread may be able to reach the chain.
pub(crate) unsafe fn destroy_chain(head: Shared<'_, Entry>) {
    let guard = crossbeam_epoch::unprotected();
    for (ptr, _) in Chain::new(head, guard) {
        drop(ptr.into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::{destroy_chain, find, resized, resizing, Chain, Entry, Slot, Splice};
    use crate::Key;

    use crossbeam_epoch::{Guard, Owned, Shared};

    fn build<'g>(guard: &'g Guard, keys: &[u128]) -> Shared<'g, Entry> {
        keys.iter().rev().fold(Shared::null(), |next, &k| {
            Owned::new(Entry::new(Key::from_u128(k), k as i32, next)).into_shared(guard)
        })
    }

    fn keys_of(guard: &Guard, head: Shared<'_, Entry>) -> Vec<u128> {
        Chain::new(head, guard)
            .map(|(_, e)| e.key.as_u128())
            .collect()
    }

    #[test]
    fn decode_slots() {
        let guard = unsafe { crossbeam_epoch::unprotected() };

        assert_eq!(Slot::decode(Shared::null()), Slot::Empty);
        assert_eq!(Slot::decode(resizing()), Slot::Resizing);
        assert_eq!(Slot::decode(resized()), Slot::Resized);

        let head = build(guard, &[1]);
        assert_eq!(Slot::decode(head), Slot::Chain(head));

        unsafe { destroy_chain(head) };
    }

    #[test]
    fn splice_without_reuses_suffix() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let head = build(guard, &[1, 2, 3, 4]);

        let target = find(head, Key::from_u128(2), guard).unwrap();
        let suffix = target.next(guard);
        let splice = Splice::without(head, target, guard);

        assert_eq!(keys_of(guard, splice.head), vec![1, 3, 4]);
        // The node for key 1 was copied, the nodes for 3 and 4 are shared.
        assert_ne!(splice.head, head);
        assert_eq!(unsafe { splice.head.deref() }.next(guard), suffix);

        unsafe {
            splice.discard(guard);
            destroy_chain(head);
        }
    }

    #[test]
    fn splice_push_front_replaces_head() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let head = build(guard, &[1, 2, 3]);

        let target = find(head, Key::from_u128(3), guard).unwrap();
        let splice = Splice::without(head, target, guard).push_front(Key::from_u128(3), 30, guard);

        assert_eq!(keys_of(guard, splice.head), vec![3, 1, 2]);
        assert_eq!(find(splice.head, Key::from_u128(3), guard).unwrap().value, 30);

        unsafe {
            splice.discard(guard);
            destroy_chain(head);
        }
    }

    #[test]
    fn splice_of_head_only_links_to_rest() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let head = build(guard, &[7, 8]);

        let target = unsafe { head.deref() };
        let splice = Splice::without(head, target, guard);

        assert_eq!(splice.head, target.next(guard));
        assert_eq!(keys_of(guard, splice.head), vec![8]);

        unsafe {
            splice.discard(guard);
            destroy_chain(head);
        }
    }
}
