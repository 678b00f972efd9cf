use super::{
    bucket_table::BucketTable,
    entry::{self, Slot, Splice},
    size::SizeTracker,
};
use crate::{
    common::{
        concurrent::constants::PARTITIONED_SIZE_THRESHOLD,
        error::{MapError, Result},
        ResizeConfig,
    },
    Key,
};

use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Shared};
use crossbeam_utils::Backoff;

/// What a compute closure wants done with the entry for its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Keep,
    Put(i32),
    Remove,
}

/// The result of a compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Outcome {
    /// The value mapped before the operation took effect.
    pub(crate) previous: Option<i32>,
    /// The value mapped right after it took effect.
    pub(crate) current: Option<i32>,
}

impl Outcome {
    fn unchanged(previous: Option<i32>) -> Self {
        Self {
            previous,
            current: previous,
        }
    }

    pub(crate) fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// A view of a map's current table and size together with the operations
/// that follow the table through resizes.
pub(crate) struct TableRef<'a> {
    pub(crate) table: &'a Atomic<BucketTable>,
    pub(crate) size: &'a SizeTracker,
    pub(crate) config: &'a ResizeConfig,
}

impl<'a> TableRef<'a> {
    pub(crate) fn current<'g>(&self, guard: &'g Guard) -> &'g BucketTable {
        // SAFETY: The map always holds a table, and a replaced table is only
        // destroyed through the epoch collector.
        unsafe { self.table.load(Ordering::Acquire, guard).deref() }
    }

    pub(crate) fn get(&self, key: Key) -> Option<i32> {
        let guard = &crossbeam_epoch::pin();
        let hash = key.spread_hash();
        let mut table = self.current(guard);

        loop {
            let index = table.index_for(hash);

            match table.slot(index, guard) {
                Slot::Empty => return None,
                Slot::Chain(head) => return entry::find(head, key, guard).map(|e| e.value),
                Slot::Resizing | Slot::Resized => {
                    table = table.help_resize_until_moved(index, guard);
                }
            }
        }
    }

    /// Applies `decide` to the value mapped to `key` and carries out its
    /// decision atomically. `decide` is called again whenever the bucket
    /// changed under it.
    ///
    /// Grows the table after a new key was inserted, which is the only way
    /// this can fail.
    pub(crate) fn compute<F>(&self, key: Key, decide: F) -> Result<Outcome>
    where
        F: FnMut(Option<i32>) -> Decision,
    {
        let guard = &crossbeam_epoch::pin();
        let (outcome, inserted_into) = self.compute_in(key, decide, guard);

        if let Some(table) = inserted_into {
            self.grow_if_needed(table, guard)?;
        }

        Ok(outcome)
    }

    /// Like `compute`, for a `decide` that never inserts a new key.
    pub(crate) fn modify<F>(&self, key: Key, decide: F) -> Outcome
    where
        F: FnMut(Option<i32>) -> Decision,
    {
        let guard = &crossbeam_epoch::pin();
        let (outcome, inserted_into) = self.compute_in(key, decide, guard);
        debug_assert!(inserted_into.is_none());
        outcome
    }

    fn compute_in<'g, F>(
        &self,
        key: Key,
        mut decide: F,
        guard: &'g Guard,
    ) -> (Outcome, Option<&'g BucketTable>)
    where
        F: FnMut(Option<i32>) -> Decision,
    {
        let hash = key.spread_hash();
        let mut table = self.current(guard);

        loop {
            let index = table.index_for(hash);
            let current = table.load(index, guard);

            let head = match Slot::decode(current) {
                Slot::Empty => Shared::null(),
                Slot::Chain(head) => head,
                Slot::Resizing | Slot::Resized => {
                    table = table.help_resize_until_moved(index, guard);
                    continue;
                }
            };

            let found = entry::find(head, key, guard);
            let previous = found.map(|e| e.value);

            match (decide(previous), found) {
                (Decision::Keep, _) | (Decision::Remove, None) => {
                    return (Outcome::unchanged(previous), None);
                }
                (Decision::Put(value), None) => {
                    if table.cas_cons(index, current, key, value, guard) {
                        self.size.add(1);
                        let outcome = Outcome {
                            previous,
                            current: Some(value),
                        };
                        return (outcome, Some(table));
                    }
                }
                (Decision::Put(value), Some(target)) => {
                    let splice = Splice::without(head, target, guard).push_front(key, value, guard);
                    if table.cas(index, current, splice.head, guard) {
                        // SAFETY: The copied prefix and the target were
                        // replaced by the splice.
                        unsafe { entry::defer_destroy_through(guard, head, target) };
                        let outcome = Outcome {
                            previous,
                            current: Some(value),
                        };
                        return (outcome, None);
                    }
                    // SAFETY: The swing failed, so the splice was never seen.
                    unsafe { splice.discard(guard) };
                }
                (Decision::Remove, Some(target)) => {
                    let splice = Splice::without(head, target, guard);
                    if table.cas(index, current, splice.head, guard) {
                        // SAFETY: As above.
                        unsafe { entry::defer_destroy_through(guard, head, target) };
                        self.size.add(-1);
                        let outcome = Outcome {
                            previous,
                            current: None,
                        };
                        return (outcome, None);
                    }
                    // SAFETY: As above.
                    unsafe { splice.discard(guard) };
                }
            }
        }
    }

    fn grow_if_needed<'g>(&self, table: &'g BucketTable, guard: &'g Guard) -> Result<()> {
        if self.size.sum() > table.threshold() {
            self.resize(table, guard)
        } else {
            Ok(())
        }
    }

    /// Resizes `table` into a table twice its length, or helps the resize
    /// already in progress.
    fn resize<'g>(&self, table: &'g BucketTable, guard: &'g Guard) -> Result<()> {
        if table.coordinator(guard).is_some() {
            table.help_resize(guard);
            return Ok(());
        }

        let new_length = table.len() * 2;
        let max_capacity = self.config.max_capacity;
        if new_length > max_capacity {
            #[cfg(feature = "logging")]
            log::warn!(
                "Cannot grow beyond {} buckets; {} entries are mapped",
                max_capacity,
                self.size.sum()
            );
            return Err(MapError::CapacityExceeded { max_capacity });
        }

        let size = self.size;
        let (coordinator, owner) = table.announce_resize(
            new_length,
            self.config.transfer_chunk.min(table.len()),
            || {
                if new_length >= PARTITIONED_SIZE_THRESHOLD && size.partition() {
                    #[cfg(feature = "logging")]
                    log::debug!("Switched to partitioned size counters at {} buckets", new_length);
                }
            },
            guard,
        );

        if !owner {
            table.help_resize(guard);
            return Ok(());
        }

        #[cfg(feature = "logging")]
        log::debug!("Resizing from {} to {} buckets", table.len(), new_length);

        table.transfer(coordinator, guard);
        self.install(table, coordinator.next_table(guard), guard);

        Ok(())
    }

    /// Replaces `old` with `next` as the map's table and retires `old`.
    fn install<'g>(&self, old: &'g BucketTable, next: &'g BucketTable, guard: &'g Guard) {
        let old = Shared::from(old as *const BucketTable);
        let next = Shared::from(next as *const BucketTable);
        let backoff = Backoff::new();

        loop {
            match self
                .table
                .compare_exchange(old, next, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    // SAFETY: Every bucket of `old` was moved and it is no
                    // longer the map's table.
                    unsafe { guard.defer_destroy(old) };
                    return;
                }
                Err(e) => {
                    // `old` grew before it was installed. Finish the resize
                    // of the table that is installed so that `old` gets its
                    // turn.
                    // SAFETY: See `current`.
                    let installed = unsafe { e.current.deref() };
                    if installed.coordinator(guard).is_some() {
                        installed.help_resize(guard);
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Empties every bucket, following a concurrent resize into the next
    /// table.
    pub(crate) fn clear(&self) {
        let guard = &crossbeam_epoch::pin();
        let mut table = self.current(guard);

        loop {
            let mut moved = false;

            for index in 0..table.len() {
                loop {
                    let current = table.load(index, guard);

                    match Slot::decode(current) {
                        Slot::Empty => break,
                        Slot::Resizing | Slot::Resized => {
                            moved = true;
                            break;
                        }
                        Slot::Chain(head) => {
                            if table.cas(index, current, Shared::null(), guard) {
                                // SAFETY: The bucket no longer links to the chain.
                                let removed = unsafe { entry::defer_destroy_chain(guard, head) };
                                self.size.add(-(removed as isize));
                                break;
                            }
                        }
                    }
                }
            }

            if !moved {
                return;
            }

            table = table.help_resize_to_completion(guard);
        }
    }
}

/// A value, or the function that produces it on first use. Lets a compute
/// closure that is retried call a user supplied function only once.
pub(crate) enum ValueOrFunction<T, F> {
    Value(T),
    Function(Option<F>),
}

impl<T, F> ValueOrFunction<T, F>
where
    T: Copy,
    F: FnOnce() -> T,
{
    pub(crate) fn new(f: F) -> Self {
        Self::Function(Some(f))
    }

    pub(crate) fn get(&mut self) -> T {
        match self {
            Self::Value(value) => *value,
            Self::Function(f) => {
                let value = match f.take() {
                    Some(f) => f(),
                    None => unreachable!("the function was taken without storing its value"),
                };
                *self = Self::Value(value);
                value
            }
        }
    }
}
