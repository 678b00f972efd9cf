use super::{
    entry::{self, Chain, Entry, Slot},
    resize::ResizeCoordinator,
};
use crate::{
    common::error::{MapError, Result},
    Key,
};

use std::{ops::Range, sync::atomic::Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;

pub(crate) struct BucketTable {
    pub(crate) buckets: Box<[Atomic<Entry>]>,
    /// The coordinator of the resize moving this table's entries into a
    /// larger table. Null until a resize is announced.
    pub(crate) resize: Atomic<ResizeCoordinator>,
    /// Held only while allocating the next table and publishing `resize`.
    pub(crate) resize_lock: Mutex<()>,
}

impl BucketTable {
    pub(crate) fn with_length(length: usize) -> Self {
        assert!(length.is_power_of_two());

        let buckets = (0..length).map(|_| Atomic::null()).collect();

        Self {
            buckets,
            resize: Atomic::null(),
            resize_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn index_for(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    /// The number of entries above which an insertion grows the table:
    /// three quarters of the bucket count.
    #[inline]
    pub(crate) fn threshold(&self) -> usize {
        let length = self.buckets.len();
        (length >> 1) + (length >> 2)
    }

    #[inline]
    pub(crate) fn load<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Entry> {
        self.buckets[index].load(Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn slot<'g>(&self, index: usize, guard: &'g Guard) -> Slot<'g> {
        Slot::decode(self.load(index, guard))
    }

    /// Swings bucket `index` from `current` to `new`. `new` must already be
    /// reachable only through this call.
    #[inline]
    pub(crate) fn cas<'g>(
        &self,
        index: usize,
        current: Shared<'g, Entry>,
        new: Shared<'g, Entry>,
        guard: &'g Guard,
    ) -> bool {
        self.buckets[index]
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire, guard)
            .is_ok()
    }

    /// Conses a new entry onto the chain `current` of bucket `index`.
    #[inline]
    pub(crate) fn cas_cons<'g>(
        &self,
        index: usize,
        current: Shared<'g, Entry>,
        key: Key,
        value: i32,
        guard: &'g Guard,
    ) -> bool {
        self.buckets[index]
            .compare_exchange(
                current,
                Owned::new(Entry::new(key, value, current)),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .is_ok()
    }

    pub(crate) fn coordinator<'g>(&self, guard: &'g Guard) -> Option<&'g ResizeCoordinator> {
        // SAFETY: The coordinator is owned by this table and dropped with it,
        // and the table itself is only destroyed through the epoch collector.
        unsafe { self.resize.load(Ordering::Acquire, guard).as_ref() }
    }

    /// The table the chains of moved buckets live in.
    ///
    /// Must only be called after a moved bucket was observed, which implies a
    /// published coordinator.
    pub(crate) fn next_table<'g>(&self, guard: &'g Guard) -> &'g BucketTable {
        match self.coordinator(guard) {
            Some(coordinator) => coordinator.next_table(guard),
            None => unreachable!("a bucket was moved without a resize in progress"),
        }
    }

    /// Visits every entry of the buckets in `range` without following a
    /// resize. Fails as soon as a moved bucket is found.
    pub(crate) fn scan_stable<F>(
        &self,
        range: Range<usize>,
        guard: &Guard,
        mut with_entry: F,
    ) -> Result<()>
    where
        F: FnMut(&Entry) -> Result<()>,
    {
        for index in range {
            match self.slot(index, guard) {
                Slot::Empty => {}
                Slot::Chain(head) => {
                    for (_, entry) in Chain::new(head, guard) {
                        with_entry(entry)?;
                    }
                }
                Slot::Resizing | Slot::Resized => return Err(MapError::ConcurrentModification),
            }
        }

        Ok(())
    }

    /// Frees every chain of this table immediately.
    ///
    /// # Safety
    ///
    /// No other thread may be able to reach the table.
    pub(crate) unsafe fn destroy_chains(&self) {
        let guard = crossbeam_epoch::unprotected();
        for bucket in self.buckets.iter() {
            if let Slot::Chain(head) = Slot::decode(bucket.load(Ordering::Relaxed, guard)) {
                entry::destroy_chain(head);
            }
        }
    }
}

impl Drop for BucketTable {
    fn drop(&mut self) {
        // The chains are not dropped here: a retired table only holds moved
        // buckets, and the current table's chains are freed by the map.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let coordinator = self.resize.load(Ordering::Relaxed, guard);
        if !coordinator.is_null() {
            // SAFETY: The coordinator was allocated as an `Owned` by this
            // table and nothing else frees it. It does not own the next table.
            drop(unsafe { coordinator.into_owned() });
        }
    }
}
