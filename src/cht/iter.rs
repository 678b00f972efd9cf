use super::map::{
    bucket_table::BucketTable,
    entry::{Entry, Slot},
    table_ref::TableRef,
};
use crate::Key;

use std::{marker::PhantomData, ptr};

use crossbeam_epoch::Guard;
use smallvec::SmallVec;

/// A range of buckets still to be visited.
#[derive(Clone, Copy)]
struct Pending {
    table: *const BucketTable,
    start: usize,
    end: usize,
}

/// An iterator over the entries of a map, following resizes that happen
/// while it runs.
///
/// Entries present for the whole lifetime of the iterator are yielded exactly
/// once. Entries inserted or removed while it runs may or may not be seen.
///
/// The iterator keeps its thread pinned to the current epoch until it is
/// dropped, which holds back the reclamation of removed entries. Prefer to
/// drop it promptly.
pub struct Iter<'a> {
    guard: Guard,
    table: *const BucketTable,
    index: usize,
    end: usize,
    todo: SmallVec<[Pending; 4]>,
    chain: *const Entry,
    _marker: PhantomData<&'a BucketTable>,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(table_ref: &TableRef<'a>) -> Self {
        let guard = crossbeam_epoch::pin();
        let table = table_ref.current(&guard);
        let end = table.len();
        let table = table as *const BucketTable;

        Self {
            guard,
            table,
            index: 0,
            end,
            todo: SmallVec::new(),
            chain: ptr::null(),
            _marker: PhantomData,
        }
    }

    /// Moves to the next non-empty bucket. Returns `false` once every range
    /// was visited.
    fn advance(&mut self) -> bool {
        loop {
            // SAFETY: Every table reached while `self.guard` is pinned stays
            // allocated until the guard is dropped with the iterator.
            let table = unsafe { &*self.table };

            while self.index < self.end {
                let index = self.index;

                match table.slot(index, &self.guard) {
                    Slot::Empty => self.index += 1,
                    Slot::Chain(head) => {
                        self.chain = head.as_raw();
                        self.index += 1;
                        return true;
                    }
                    Slot::Resizing | Slot::Resized => {
                        let next = table.help_resize_until_moved(index, &self.guard);

                        let mut end_resized = index + 1;
                        while end_resized < self.end
                            && table.slot(end_resized, &self.guard) == Slot::Resized
                        {
                            end_resized += 1;
                        }

                        if end_resized < self.end {
                            self.todo.push(Pending {
                                table: self.table,
                                start: end_resized,
                                end: self.end,
                            });
                        }

                        // Bucket `i` splits into `i` and `i + n` of the next table.
                        let n = table.len();
                        self.todo.push(Pending {
                            table: next as *const BucketTable,
                            start: index + n,
                            end: end_resized + n,
                        });

                        self.table = next as *const BucketTable;
                        self.end = end_resized;
                        break;
                    }
                }
            }

            if self.index < self.end {
                // Switched to the next table.
                continue;
            }

            match self.todo.pop() {
                Some(pending) => {
                    self.table = pending.table;
                    self.index = pending.start;
                    self.end = pending.end;
                }
                None => return false,
            }
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Key, i32);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // SAFETY: See `advance`. Chains are immutable and their nodes are
            // only destroyed through the epoch collector.
            if let Some(entry) = unsafe { self.chain.as_ref() } {
                self.chain = entry.next(&self.guard).as_raw();
                return Some((entry.key, entry.value));
            }

            if !self.advance() {
                return None;
            }
        }
    }
}

/// An iterator over the keys of a map. See [`Iter`](./struct.Iter.html).
pub struct Keys<'a>(pub(crate) Iter<'a>);

impl<'a> Iterator for Keys<'a> {
    type Item = Key;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(key, _)| key)
    }
}

/// An iterator over the values of a map. See [`Iter`](./struct.Iter.html).
pub struct Values<'a>(pub(crate) Iter<'a>);

impl<'a> Iterator for Values<'a> {
    type Item = i32;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(_, value)| value)
    }
}
