//! Cooperative transfer of a bucket table into a table twice its size.

use super::{
    bucket_table::BucketTable,
    entry::{self, Entry, Slot},
};

use std::{
    ops::Range,
    sync::atomic::{AtomicIsize, AtomicUsize, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex};

/// Shared state of one resize, published on the source table.
pub(crate) struct ResizeCoordinator {
    /// The destination table. Not owned: once the resize completes it becomes
    /// the map's current table.
    next: Atomic<BucketTable>,
    /// Threads currently transferring buckets, the owner included.
    helpers: AtomicUsize,
    /// Upper end of the next chunk a helper will claim. Decreases
    /// monotonically and may go negative.
    claim: AtomicIsize,
    chunk: usize,
    lock: Mutex<()>,
    all_left: Condvar,
}

impl ResizeCoordinator {
    fn new(next: BucketTable, source_len: usize, chunk: usize) -> Self {
        debug_assert!(chunk.is_power_of_two());

        Self {
            next: Atomic::new(next),
            helpers: AtomicUsize::new(1),
            claim: AtomicIsize::new(source_len as isize),
            chunk,
            lock: Mutex::new(()),
            all_left: Condvar::new(),
        }
    }

    pub(crate) fn next_table<'g>(&self, guard: &'g Guard) -> &'g BucketTable {
        // SAFETY: The next table is never null. It is only retired after it
        // was installed and then replaced by its own successor, which happens
        // after the source table holding this coordinator was retired, so it
        // outlives every guard that can reach this coordinator.
        unsafe { self.next.load(Ordering::Acquire, guard).deref() }
    }

    #[inline]
    fn helpers(&self) -> usize {
        self.helpers.load(Ordering::Acquire)
    }

    #[inline]
    fn has_unclaimed_chunks(&self) -> bool {
        self.claim.load(Ordering::Acquire) > self.chunk as isize
    }

    fn claim_chunk(&self) -> Option<Range<usize>> {
        if self.claim.load(Ordering::Acquire) <= 0 {
            return None;
        }

        let chunk = self.chunk as isize;
        let start = self.claim.fetch_sub(chunk, Ordering::AcqRel) - chunk;
        let end = start + chunk;

        (end > 0).then(|| start.max(0) as usize..end as usize)
    }

    fn join(&self) {
        self.helpers.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        if self.helpers.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _lock = self.lock.lock();
            self.all_left.notify_all();
        }
    }

    fn wait_for_helpers(&self) {
        let backoff = Backoff::new();

        while self.helpers() > 0 {
            if backoff.is_completed() {
                let mut lock = self.lock.lock();
                while self.helpers() > 0 {
                    self.all_left.wait(&mut lock);
                }
                return;
            }

            backoff.snooze();
        }
    }
}

impl BucketTable {
    /// Publishes a coordinator for a resize into a table of `new_length`
    /// buckets unless one is already published.
    ///
    /// Returns the coordinator and whether this call published it, which
    /// makes the caller the owner of the resize. `on_announce` runs inside
    /// the critical section, only for the owner.
    pub(crate) fn announce_resize<'g>(
        &self,
        new_length: usize,
        chunk: usize,
        on_announce: impl FnOnce(),
        guard: &'g Guard,
    ) -> (&'g ResizeCoordinator, bool) {
        if let Some(coordinator) = self.coordinator(guard) {
            return (coordinator, false);
        }

        let _lock = self.resize_lock.lock();

        if let Some(coordinator) = self.coordinator(guard) {
            return (coordinator, false);
        }

        on_announce();

        let coordinator = Owned::new(ResizeCoordinator::new(
            BucketTable::with_length(new_length),
            self.len(),
            chunk,
        ))
        .into_shared(guard);
        self.resize.store(coordinator, Ordering::Release);

        // SAFETY: Just allocated, and only freed when this table is dropped.
        (unsafe { coordinator.deref() }, true)
    }

    /// Moves every bucket into the next table, scanning forward from the
    /// first bucket. Called by the owner of the resize only. Returns once all
    /// helpers have left.
    pub(crate) fn transfer(&self, coordinator: &ResizeCoordinator, guard: &Guard) {
        let next = coordinator.next_table(guard);
        let chunk = coordinator.chunk;
        let mut index = 0;

        while index < self.len() {
            let current = self.load(index, guard);

            match Slot::decode(current) {
                Slot::Empty => {
                    if self.cas(index, current, entry::resized(), guard) {
                        index += 1;
                    }
                }
                Slot::Chain(head) => {
                    if self.move_chain(index, head, next, guard) {
                        index += 1;
                    }
                }
                Slot::Resizing | Slot::Resized => {
                    // A helper moved the rest of this chunk.
                    index = (index & !(chunk - 1)) + chunk;
                    if coordinator.helpers() == 1 {
                        break;
                    }
                }
            }
        }

        coordinator.leave();
        coordinator.wait_for_helpers();
    }

    /// Moves buckets of chunks claimed from the back of the table, each
    /// scanned from its last bucket down. Stops at the first bucket that was
    /// already moved, since the owner's forward scan got there first.
    fn reverse_transfer(&self, coordinator: &ResizeCoordinator, guard: &Guard) {
        let next = coordinator.next_table(guard);

        while let Some(range) = coordinator.claim_chunk() {
            for index in range.rev() {
                loop {
                    let current = self.load(index, guard);

                    match Slot::decode(current) {
                        Slot::Empty => {
                            if self.cas(index, current, entry::resized(), guard) {
                                break;
                            }
                        }
                        Slot::Chain(head) => {
                            if self.move_chain(index, head, next, guard) {
                                break;
                            }
                        }
                        Slot::Resizing | Slot::Resized => return,
                    }
                }
            }
        }
    }

    /// Joins the resize of this table while there are unclaimed chunks left,
    /// and returns the table the entries are moving to.
    pub(crate) fn help_resize<'g>(&self, guard: &'g Guard) -> &'g BucketTable {
        let Some(coordinator) = self.coordinator(guard) else {
            unreachable!("helping a table that is not being resized");
        };

        if coordinator.has_unclaimed_chunks() {
            coordinator.join();
            self.reverse_transfer(coordinator, guard);
            coordinator.leave();
        }

        coordinator.next_table(guard)
    }

    /// Helps the resize until bucket `index` has been moved, then returns the
    /// table its entries now live in.
    pub(crate) fn help_resize_until_moved<'g>(
        &self,
        index: usize,
        guard: &'g Guard,
    ) -> &'g BucketTable {
        let mut next = self.help_resize(guard);
        let backoff = Backoff::new();

        while self.slot(index, guard) != Slot::Resized {
            backoff.snooze();
            next = self.help_resize(guard);
        }

        next
    }

    /// Helps the resize and then waits until every bucket has been moved.
    /// Returns the table the entries moved to.
    pub(crate) fn help_resize_to_completion<'g>(&self, guard: &'g Guard) -> &'g BucketTable {
        let next = self.help_resize(guard);
        if let Some(coordinator) = self.coordinator(guard) {
            // The owner counts as a helper until its forward scan is done.
            coordinator.wait_for_helpers();
        }
        next
    }

    /// Marks bucket `index` as resizing, copies its chain into `next` and
    /// marks it resized. Returns `false` if the bucket changed before it
    /// could be claimed.
    fn move_chain<'g>(
        &self,
        index: usize,
        head: Shared<'g, Entry>,
        next: &'g BucketTable,
        guard: &'g Guard,
    ) -> bool {
        if !self.cas(index, head, entry::resizing(), guard) {
            return false;
        }

        let mut current = head;
        // SAFETY: See `entry::Chain`.
        while let Some(this_entry) = unsafe { current.as_ref() } {
            let following = this_entry.next(guard);

            if !next.copy_entry(current, this_entry, guard) {
                // SAFETY: The node was copied, and the only bucket that
                // linked to it is now tagged.
                unsafe { guard.defer_destroy(current) };
            }

            current = following;
        }

        self.buckets[index].store(entry::resized(), Ordering::Release);
        true
    }

    /// Adds one moved entry to this table, following this table's own resize
    /// if its bucket was already moved on.
    ///
    /// A last node landing in an empty bucket is linked as is; any other node
    /// is copied. Returns `true` if `ptr` itself was linked.
    fn copy_entry<'g>(&'g self, ptr: Shared<'g, Entry>, this_entry: &Entry, guard: &'g Guard) -> bool {
        let hash = this_entry.key.spread_hash();
        let mut table = self;

        loop {
            let index = table.index_for(hash);
            let current = table.load(index, guard);

            match Slot::decode(current) {
                Slot::Resizing | Slot::Resized => table = table.next_table(guard),
                Slot::Empty if this_entry.next(guard).is_null() => {
                    if table.cas(index, current, ptr, guard) {
                        return true;
                    }
                }
                Slot::Empty | Slot::Chain(_) => {
                    if table.cas_cons(index, current, this_entry.key, this_entry.value, guard) {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BucketTable, ResizeCoordinator};
    use crate::{
        cht::map::entry::{find, Slot},
        Key,
    };

    use std::sync::atomic::Ordering;

    fn fill(table: &BucketTable, keys: impl Iterator<Item = u128>) {
        let guard = &crossbeam_epoch::pin();
        for k in keys {
            let key = Key::from_u128(k);
            let index = table.index_for(key.spread_hash());
            loop {
                let current = table.load(index, guard);
                if table.cas_cons(index, current, key, k as i32, guard) {
                    break;
                }
            }
        }
    }

    fn lookup(table: &BucketTable, k: u128) -> Option<i32> {
        let guard = &crossbeam_epoch::pin();
        let key = Key::from_u128(k);
        let Slot::Chain(head) = table.slot(table.index_for(key.spread_hash()), guard) else {
            return None;
        };
        find(head, key, guard).map(|e| e.value)
    }

    fn free_next(coordinator: &ResizeCoordinator) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let next = coordinator.next.load(Ordering::Relaxed, guard);
        unsafe {
            next.deref().destroy_chains();
            drop(next.into_owned());
        }
    }

    #[test]
    fn claim_chunks_count_down() {
        let coordinator = ResizeCoordinator::new(BucketTable::with_length(2), 40, 16);

        assert!(coordinator.has_unclaimed_chunks());
        assert_eq!(coordinator.claim_chunk(), Some(24..40));
        assert_eq!(coordinator.claim_chunk(), Some(8..24));
        assert!(!coordinator.has_unclaimed_chunks());
        assert_eq!(coordinator.claim_chunk(), Some(0..8));
        assert_eq!(coordinator.claim_chunk(), None);

        free_next(&coordinator);
    }

    #[test]
    fn announce_once() {
        let table = BucketTable::with_length(16);
        let guard = &crossbeam_epoch::pin();
        let mut announced = 0;

        let (first, owner) = table.announce_resize(32, 4, || announced += 1, guard);
        assert!(owner);
        let (second, owner) = table.announce_resize(32, 4, || announced += 1, guard);
        assert!(!owner);
        assert!(std::ptr::eq(first, second));
        assert_eq!(announced, 1);
        assert_eq!(first.next_table(guard).len(), 32);

        // Nothing to move: finish the resize so the next table can be freed.
        table.transfer(first, guard);
        free_next(first);
    }

    #[test]
    fn transfer_moves_every_entry() {
        let table = BucketTable::with_length(16);
        fill(&table, 0..100);

        let guard = &crossbeam_epoch::pin();
        let (coordinator, owner) = table.announce_resize(32, 4, || (), guard);
        assert!(owner);
        table.transfer(coordinator, guard);

        for index in 0..table.len() {
            assert_eq!(table.slot(index, guard), Slot::Resized);
        }

        let next = coordinator.next_table(guard);
        for k in 0..100 {
            assert_eq!(lookup(next, k), Some(k as i32));
        }
        assert_eq!(lookup(next, 100), None);

        free_next(coordinator);
    }

    #[test]
    fn helpers_and_owner_converge() {
        const NUM_THREADS: usize = 8;

        let table = BucketTable::with_length(1024);
        fill(&table, 0..700);

        let guard = &crossbeam_epoch::pin();
        let (coordinator, _) = table.announce_resize(2048, 16, || (), guard);

        crossbeam_utils::thread::scope(|s| {
            for i in 0..NUM_THREADS {
                let table = &table;
                s.spawn(move |_| {
                    let guard = &crossbeam_epoch::pin();
                    let index = (i * 131) % table.len();
                    let next = table.help_resize_until_moved(index, guard);
                    assert_eq!(next.len(), 2048);
                });
            }

            table.transfer(coordinator, guard);
        })
        .unwrap();

        for index in 0..table.len() {
            assert_eq!(table.slot(index, guard), Slot::Resized);
        }

        let next = coordinator.next_table(guard);
        for k in 0..700 {
            assert_eq!(lookup(next, k), Some(k as i32));
        }

        free_next(coordinator);
    }
}
