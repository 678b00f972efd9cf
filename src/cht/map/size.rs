use crate::common::concurrent::constants::SIZE_BUCKETS;

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicIsize, Ordering},
    thread,
};

use crossbeam_utils::CachePadded;
use once_cell::sync::OnceCell;

thread_local! {
    static PROBE: usize = {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        hasher.finish() as usize
    };
}

/// Counts the entries of a map.
///
/// Starts with a single counter. Once the map grows large, updates are spread
/// over `SIZE_BUCKETS` cache-padded counters picked by thread, so writers on
/// different threads stop contending on one cache line. Reads sum all
/// counters; the sum is exact only when no update is in flight.
pub(crate) struct SizeTracker {
    single: AtomicIsize,
    partitioned: OnceCell<Box<[CachePadded<AtomicIsize>]>>,
}

impl Default for SizeTracker {
    fn default() -> Self {
        Self {
            single: AtomicIsize::new(0),
            partitioned: OnceCell::new(),
        }
    }
}

impl SizeTracker {
    pub(crate) fn add(&self, delta: isize) {
        match self.partitioned.get() {
            Some(counters) => {
                let index = PROBE.with(|probe| *probe) & (SIZE_BUCKETS - 1);
                counters[index].fetch_add(delta, Ordering::Relaxed);
            }
            None => {
                self.single.fetch_add(delta, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn sum(&self) -> usize {
        let mut sum = self.single.load(Ordering::Relaxed);
        if let Some(counters) = self.partitioned.get() {
            sum += counters
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .sum::<isize>();
        }

        // Counters of different threads can be observed out of order.
        sum.max(0) as usize
    }

    /// Switches to partitioned counters. Returns `true` on the first call.
    pub(crate) fn partition(&self) -> bool {
        let mut switched = false;
        self.partitioned.get_or_init(|| {
            switched = true;
            (0..SIZE_BUCKETS)
                .map(|_| CachePadded::new(AtomicIsize::new(0)))
                .collect()
        });
        switched
    }
}
