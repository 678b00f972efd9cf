mod bulk;
mod persist;

use crate::{
    cht::{
        iter::{Iter, Keys, Values},
        map::{
            bucket_table::BucketTable,
            size::SizeTracker,
            table_ref::{Decision, TableRef, ValueOrFunction},
        },
    },
    common::{
        concurrent::constants::{DEFAULT_INITIAL_CAPACITY, MAXIMUM_CAPACITY},
        error::Result,
        ResizeConfig,
    },
    Key, UuidIntMapBuilder,
};

use std::{fmt, ptr, sync::atomic::Ordering};

use crossbeam_epoch::{Atomic, Owned};

/// A thread-safe concurrent hash map from 128-bit [`Key`][key]s to `i32`
/// values.
///
/// `UuidIntMap` supports full concurrency of retrievals and updates. All
/// methods take `&self`; share the map between threads with an `Arc` or a
/// scoped thread. Retrievals never block. Updates of the same bucket race with
/// a compare-and-swap and the losers retry, so no update is ever lost.
///
/// The map grows by doubling its bucket table once it holds more than three
/// quarters as many entries as it has buckets. Growing is incremental: every
/// thread that runs into a bucket being moved helps moving the rest before it
/// carries on, so no single thread stalls the others for a whole resize.
///
/// # Examples
///
/// ```rust
/// use uuid_int_map::{Key, UuidIntMap};
///
/// use std::thread;
///
/// const NUM_THREADS: u64 = 16;
/// const NUM_KEYS_PER_THREAD: u64 = 64;
///
/// let map = UuidIntMap::new();
///
/// thread::scope(|s| {
///     for i in 0..NUM_THREADS {
///         let map = &map;
///         s.spawn(move || {
///             let start = i * NUM_KEYS_PER_THREAD;
///             let end = (i + 1) * NUM_KEYS_PER_THREAD;
///
///             for n in start..end {
///                 let key = Key::new(i, n);
///                 map.put(key, n as i32).unwrap();
///                 assert_eq!(map.get(key), Some(n as i32));
///             }
///
///             // Remove every 4th entry this thread inserted.
///             for n in (start..end).step_by(4) {
///                 map.remove(Key::new(i, n));
///             }
///         });
///     }
/// });
///
/// assert_eq!(map.len(), (NUM_THREADS * NUM_KEYS_PER_THREAD * 3 / 4) as usize);
/// ```
///
/// # Consistency
///
/// Every operation on a single key is linearizable: once `put` returned,
/// every `get` that starts afterwards sees that value or a later one.
/// Nothing stronger holds across keys. [`len`](#method.len) is exact only
/// when no update is in flight, and iterators are weakly consistent.
///
/// Whole-table scans that need a stable layout, such as
/// [`content_hash`](#method.content_hash) or [`write_to`](#method.write_to),
/// fail with [`MapError::ConcurrentModification`][conc-mod] instead of
/// returning a partial result if they run into a resize.
///
/// [key]: ./struct.Key.html
/// [conc-mod]: ./enum.MapError.html#variant.ConcurrentModification
pub struct UuidIntMap {
    table: Atomic<BucketTable>,
    size: SizeTracker,
    config: ResizeConfig,
}

// SAFETY: All shared state is reached through atomics and reclaimed through
// the epoch collector. Keys and values are plain `Copy` data.
unsafe impl Send for UuidIntMap {}
unsafe impl Sync for UuidIntMap {}

impl UuidIntMap {
    /// Constructs a new, empty map with room for 16 buckets.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Constructs a new, empty map that can hold at least `capacity` entries
    /// before it has to grow.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().initial_capacity(capacity).build()
    }

    /// Returns a [`UuidIntMapBuilder`][builder-struct], which can build a map
    /// with a custom initial capacity and growth limits.
    ///
    /// [builder-struct]: ./struct.UuidIntMapBuilder.html
    pub fn builder() -> UuidIntMapBuilder {
        UuidIntMapBuilder::default()
    }

    pub(crate) fn with_everything(initial_capacity: Option<usize>, config: ResizeConfig) -> Self {
        let length = initial_capacity
            .map(|n| n.saturating_add(n >> 1).max(DEFAULT_INITIAL_CAPACITY))
            .unwrap_or(DEFAULT_INITIAL_CAPACITY)
            .min(config.max_capacity)
            .next_power_of_two()
            .min(MAXIMUM_CAPACITY);

        Self {
            table: Atomic::from(Owned::new(BucketTable::with_length(length))),
            size: SizeTracker::default(),
            config,
        }
    }

    pub(crate) fn table_ref(&self) -> TableRef<'_> {
        TableRef {
            table: &self.table,
            size: &self.size,
            config: &self.config,
        }
    }

    /// Returns the value mapped to `key`, if any.
    pub fn get(&self, key: Key) -> Option<i32> {
        self.table_ref().get(key)
    }

    /// Returns `true` if the map contains a value for `key`.
    pub fn contains_key(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Returns `true` if any key is mapped to `value`.
    ///
    /// This walks the whole map.
    pub fn contains_value(&self, value: i32) -> bool {
        self.values().any(|v| v == value)
    }

    /// Maps `key` to `value` and returns the value it was mapped to before.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::CapacityExceeded`][cap] if inserting a new key
    /// requires growing the table past its maximum capacity. The entry has
    /// been inserted regardless.
    ///
    /// [cap]: ./enum.MapError.html#variant.CapacityExceeded
    pub fn put(&self, key: Key, value: i32) -> Result<Option<i32>> {
        self.table_ref()
            .compute(key, |_| Decision::Put(value))
            .map(|outcome| outcome.previous)
    }

    /// Maps `key` to `value` unless the key is already mapped. Returns the
    /// existing value, or `None` if `value` was inserted.
    ///
    /// Concurrent calls for the same absent key insert exactly one value, and
    /// every other caller gets that value back.
    pub fn put_if_absent(&self, key: Key, value: i32) -> Result<Option<i32>> {
        self.table_ref()
            .compute(key, |previous| match previous {
                Some(_) => Decision::Keep,
                None => Decision::Put(value),
            })
            .map(|outcome| outcome.previous)
    }

    /// Returns the value mapped to `key`, or maps the key to the value
    /// produced by `init` and returns that.
    ///
    /// `init` is called at most once, even if the insertion has to be retried
    /// because of a concurrent update. It may run even though another thread
    /// wins the race to insert the key, in which case its value is dropped.
    pub fn get_or_insert_with(&self, key: Key, init: impl FnOnce() -> i32) -> Result<i32> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let mut init = ValueOrFunction::new(init);
        let outcome = self.table_ref().compute(key, |previous| match previous {
            Some(_) => Decision::Keep,
            None => Decision::Put(init.get()),
        })?;

        match outcome.current {
            Some(value) => Ok(value),
            None => unreachable!("get_or_insert_with left the key unmapped"),
        }
    }

    /// Like [`get_or_insert_with`](#method.get_or_insert_with), but `init`
    /// receives the key and may decline to insert by returning `None`.
    pub fn optionally_get_or_insert_with(
        &self,
        key: Key,
        init: impl FnOnce(&Key) -> Option<i32>,
    ) -> Result<Option<i32>> {
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        let mut init = ValueOrFunction::new(|| init(&key));
        self.table_ref()
            .compute(key, |previous| match previous {
                Some(_) => Decision::Keep,
                None => init.get().map_or(Decision::Keep, Decision::Put),
            })
            .map(|outcome| outcome.current)
    }

    /// Maps `key` to `value` only if it is already mapped. Returns the value
    /// it was mapped to before.
    pub fn replace(&self, key: Key, value: i32) -> Option<i32> {
        self.table_ref()
            .modify(key, |previous| {
                previous.map_or(Decision::Keep, |_| Decision::Put(value))
            })
            .previous
    }

    /// Maps `key` to `new_value` only if it is currently mapped to
    /// `expected`. Returns `true` if it was.
    pub fn replace_if(&self, key: Key, expected: i32, new_value: i32) -> bool {
        let outcome = self.table_ref().modify(key, |previous| {
            if previous == Some(expected) {
                Decision::Put(new_value)
            } else {
                Decision::Keep
            }
        });
        outcome.previous == Some(expected)
    }

    /// Removes `key` and returns the value it was mapped to.
    pub fn remove(&self, key: Key) -> Option<i32> {
        self.table_ref()
            .modify(key, |_| Decision::Remove)
            .previous
    }

    /// Removes `key` only if it is mapped to `expected`. Returns `true` if it
    /// was removed.
    pub fn remove_if(&self, key: Key, expected: i32) -> bool {
        self.table_ref()
            .modify(key, |previous| {
                if previous == Some(expected) {
                    Decision::Remove
                } else {
                    Decision::Keep
                }
            })
            .changed()
    }

    /// Atomically applies `f` to the value mapped to `key` and returns the
    /// new value. An absent key starts from the value produced by `init`.
    ///
    /// `init` is called at most once. `f` is called again whenever a
    /// concurrent update of the same bucket forces a retry, so it should be
    /// free of side effects.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use uuid_int_map::{Key, UuidIntMap};
    ///
    /// let map = UuidIntMap::new();
    /// let key = Key::new(0, 1);
    ///
    /// // Count the occurrences of a key.
    /// assert_eq!(map.update(key, || 0, |n| n + 1).unwrap(), 1);
    /// assert_eq!(map.update(key, || 0, |n| n + 1).unwrap(), 2);
    /// ```
    pub fn update(
        &self,
        key: Key,
        init: impl FnOnce() -> i32,
        mut f: impl FnMut(i32) -> i32,
    ) -> Result<i32> {
        let mut init = ValueOrFunction::new(init);
        let outcome = self.table_ref().compute(key, |previous| {
            let base = previous.unwrap_or_else(|| init.get());
            Decision::Put(f(base))
        })?;

        match outcome.current {
            Some(value) => Ok(value),
            None => unreachable!("update left the key unmapped"),
        }
    }

    /// Inserts every entry of `entries` with [`put`](#method.put), stopping
    /// at the first error.
    pub fn insert_all(&self, entries: impl IntoIterator<Item = (Key, i32)>) -> Result<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Removes every entry.
    ///
    /// Entries inserted concurrently may or may not survive.
    pub fn clear(&self) {
        self.table_ref().clear();
    }

    /// Returns the number of entries.
    ///
    /// The count is exact only when no update is in flight.
    pub fn len(&self) -> usize {
        self.size.sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of buckets of the current table.
    pub fn capacity(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        self.table_ref().current(guard).len()
    }

    /// Returns an iterator over the entries of the map.
    ///
    /// The iterator follows resizes that happen while it runs: every entry
    /// present for its whole lifetime is yielded exactly once.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(&self.table_ref())
    }

    pub fn keys(&self) -> Keys<'_> {
        Keys(self.iter())
    }

    pub fn values(&self) -> Values<'_> {
        Values(self.iter())
    }

    /// Calls `f` for every entry of the current table.
    ///
    /// # Errors
    ///
    /// Stops with [`MapError::ConcurrentModification`][conc-mod] as soon as a
    /// bucket that is being moved by a resize is found, and with the error of
    /// `f` if it returns one.
    ///
    /// [conc-mod]: ./enum.MapError.html#variant.ConcurrentModification
    pub fn try_for_each(&self, mut f: impl FnMut(Key, i32) -> Result<()>) -> Result<()> {
        let guard = &crossbeam_epoch::pin();
        let table = self.table_ref().current(guard);
        table.scan_stable(0..table.len(), guard, |entry| f(entry.key, entry.value))
    }

    /// Returns `true` if both maps hold the same entries.
    ///
    /// Fails like [`try_for_each`](#method.try_for_each) if this map is
    /// resized during the comparison.
    pub fn try_eq(&self, other: &UuidIntMap) -> Result<bool> {
        if ptr::eq(self, other) {
            return Ok(true);
        }
        if self.len() != other.len() {
            return Ok(false);
        }

        let mut equal = true;
        self.try_for_each(|key, value| {
            if equal && other.get(key) != Some(value) {
                equal = false;
            }
            Ok(())
        })?;

        Ok(equal)
    }

    /// Returns a hash of the entries that does not depend on their order: the
    /// wrapping sum of `key.fold32() ^ value` over all entries.
    ///
    /// Fails like [`try_for_each`](#method.try_for_each) if the map is
    /// resized during the scan.
    pub fn content_hash(&self) -> Result<i32> {
        let mut hash = 0i32;
        self.try_for_each(|key, value| {
            hash = hash.wrapping_add(key.fold32() ^ value);
            Ok(())
        })?;
        Ok(hash)
    }
}

impl Default for UuidIntMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UuidIntMap {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no other thread is using the map.
        // Tables replaced by earlier resizes were already handed to the
        // epoch collector.
        unsafe {
            let guard = crossbeam_epoch::unprotected();
            let table = self.table.load(Ordering::Relaxed, guard);
            if let Some(current) = table.as_ref() {
                current.destroy_chains();
                drop(table.into_owned());
            }
        }
    }
}

impl fmt::Debug for UuidIntMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a UuidIntMap {
    type Item = (Key, i32);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}


#[cfg(test)]
mod tests {
    use super::UuidIntMap;
    use crate::{
        cht::map::entry::{self, Slot},
        common::error::MapError,
        Key,
    };

    fn key(n: u128) -> Key {
        Key::from_u128(n)
    }

    #[test]
    fn basics() {
        let map = UuidIntMap::new();
        assert!(map.is_empty());

        assert_eq!(map.put(key(1), 10).unwrap(), None);
        assert_eq!(map.put(key(1), 11).unwrap(), Some(10));
        assert_eq!(map.put_if_absent(key(1), 12).unwrap(), Some(11));
        assert_eq!(map.put_if_absent(key(2), 20).unwrap(), None);

        assert_eq!(map.len(), 2);
        assert!(map.contains_key(key(2)));
        assert!(map.contains_value(11));
        assert!(!map.contains_value(12));

        assert_eq!(map.replace(key(3), 30), None);
        assert_eq!(map.get(key(3)), None);
        assert_eq!(map.replace(key(2), 21), Some(20));

        assert!(!map.replace_if(key(2), 20, 22));
        assert!(map.replace_if(key(2), 21, 22));
        assert!(map.replace_if(key(2), 22, 22));
        assert_eq!(map.get(key(2)), Some(22));

        assert!(!map.remove_if(key(2), 21));
        assert!(map.remove_if(key(2), 22));
        assert_eq!(map.remove(key(2)), None);
        assert_eq!(map.remove(key(1)), Some(11));
        assert!(map.is_empty());
    }

    #[test]
    fn remove_then_reinsert() {
        let map = UuidIntMap::new();

        map.put(key(7), 1).unwrap();
        assert_eq!(map.remove(key(7)), Some(1));
        assert_eq!(map.get(key(7)), None);
        map.put(key(7), 2).unwrap();
        assert_eq!(map.get(key(7)), Some(2));
    }

    #[test]
    fn initializers_run_once() {
        let map = UuidIntMap::new();
        let mut calls = 0;

        assert_eq!(
            map.get_or_insert_with(key(1), || {
                calls += 1;
                5
            })
            .unwrap(),
            5
        );
        assert_eq!(map.get_or_insert_with(key(1), || unreachable!()).unwrap(), 5);
        assert_eq!(calls, 1);

        assert_eq!(map.optionally_get_or_insert_with(key(2), |_| None).unwrap(), None);
        assert!(!map.contains_key(key(2)));
        assert_eq!(
            map.optionally_get_or_insert_with(key(2), |k| Some(k.as_u128() as i32 * 10))
                .unwrap(),
            Some(20)
        );

        assert_eq!(map.update(key(3), || 100, |n| n * 2).unwrap(), 200);
        assert_eq!(map.update(key(3), || unreachable!(), |n| n + 1).unwrap(), 201);
    }

    #[test]
    fn with_capacity_sizes_the_table() {
        assert_eq!(UuidIntMap::new().capacity(), 16);
        assert_eq!(UuidIntMap::with_capacity(0).capacity(), 16);
        assert_eq!(UuidIntMap::with_capacity(100).capacity(), 256);
        assert_eq!(UuidIntMap::with_capacity(1024).capacity(), 2048);
    }

    #[test]
    fn clear_and_reuse() {
        let map = UuidIntMap::new();
        map.insert_all((0..100).map(|n| (key(n), n as i32))).unwrap();
        assert_eq!(map.len(), 100);

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);

        map.put(key(1), 1).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn equality_and_hash() {
        let a = UuidIntMap::new();
        let b = UuidIntMap::with_capacity(1000);
        for n in 0..50 {
            a.put(key(n), n as i32).unwrap();
            b.put(key(49 - n), (49 - n) as i32).unwrap();
        }

        assert!(a.try_eq(&b).unwrap());
        assert!(a.try_eq(&a).unwrap());
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());

        b.put(key(0), -1).unwrap();
        assert!(!a.try_eq(&b).unwrap());
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());

        assert_eq!(UuidIntMap::new().content_hash().unwrap(), 0);
    }

    #[test]
    fn scans_fail_on_a_moved_bucket() {
        let map = UuidIntMap::new();
        map.put(key(1), 1).unwrap();

        {
            let guard = &crossbeam_epoch::pin();
            let table = map.table_ref().current(guard);
            let index = (table.index_for(key(1).spread_hash()) + 1) & (table.len() - 1);
            let current = table.load(index, guard);
            assert_eq!(Slot::decode(current), Slot::Empty);
            assert!(table.cas(index, current, entry::resizing(), guard));
        }

        assert!(matches!(
            map.content_hash(),
            Err(MapError::ConcurrentModification)
        ));
        assert!(matches!(
            map.try_for_each(|_, _| Ok(())),
            Err(MapError::ConcurrentModification)
        ));
    }

    #[test]
    fn debug_prints_entries() {
        let map = UuidIntMap::new();
        map.put(Key::new(0, 1), 5).unwrap();

        assert_eq!(
            format!("{:?}", map),
            "{Key(00000000-0000-0000-0000-000000000001): 5}"
        );
    }
}
