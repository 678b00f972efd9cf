use super::UuidIntMap;
use crate::{
    common::{
        concurrent::constants::PARALLEL_INSERT_THRESHOLD,
        error::{MapError, PartitionError, Result},
    },
    executor::{Executor, Partition},
    Key,
};

use std::{any::Any, borrow::Cow, thread};

impl UuidIntMap {
    /// Inserts every entry of `source` into this map, splitting the source
    /// table into `num_workers` ranges of buckets that `executor` runs in
    /// parallel.
    ///
    /// Small sources, or a single worker, are inserted on the calling thread.
    ///
    /// # Errors
    ///
    /// Every partition scans its range of the source table and fails with
    /// [`MapError::ConcurrentModification`][conc-mod] if the source is being
    /// resized. When any partition fails, the others still run to completion
    /// and [`MapError::BulkInsert`][bulk] is returned after all of them are
    /// done. Entries already inserted are kept.
    ///
    /// [conc-mod]: ./enum.MapError.html#variant.ConcurrentModification
    /// [bulk]: ./enum.MapError.html#variant.BulkInsert
    pub fn bulk_insert_parallel(
        &self,
        source: &UuidIntMap,
        num_workers: usize,
        executor: &impl Executor,
    ) -> Result<()> {
        if num_workers <= 1 || source.len() < PARALLEL_INSERT_THRESHOLD {
            return source.try_for_each(|key, value| self.put(key, value).map(drop));
        }

        let guard = &crossbeam_epoch::pin();
        let table = source.table_ref().current(guard);
        let length = table.len();
        let num_workers = num_workers.min(length);
        let step = (length + num_workers - 1) / num_workers;

        let partitions = (0..length)
            .step_by(step)
            .map(|start| {
                let range = start..(start + step).min(length);
                Box::new(move || {
                    let guard = &crossbeam_epoch::pin();
                    table.scan_stable(range, guard, |entry| {
                        self.put(entry.key, entry.value).map(drop)
                    })
                }) as Partition<'_>
            })
            .collect();

        collect_results(executor.execute_all(partitions))
    }

    /// Inserts every entry of `entries`, splitting the slice into
    /// `num_workers` chunks that `executor` runs in parallel.
    ///
    /// Small slices, or a single worker, are inserted on the calling thread.
    /// Failures are reported like
    /// [`bulk_insert_parallel`](#method.bulk_insert_parallel) does.
    pub fn bulk_insert_entries_parallel(
        &self,
        entries: &[(Key, i32)],
        num_workers: usize,
        executor: &impl Executor,
    ) -> Result<()> {
        if num_workers <= 1 || entries.len() < PARALLEL_INSERT_THRESHOLD {
            return self.insert_all(entries.iter().copied());
        }

        let num_workers = num_workers.min(entries.len());
        let chunk_size = (entries.len() + num_workers - 1) / num_workers;
        let partitions = entries
            .chunks(chunk_size)
            .map(|chunk| {
                Box::new(move || self.insert_all(chunk.iter().copied())) as Partition<'_>
            })
            .collect();

        collect_results(executor.execute_all(partitions))
    }
}

fn collect_results(results: Vec<thread::Result<Result<()>>>) -> Result<()> {
    let partitions = results.len();
    let mut failed = 0;
    let mut first = None;

    for result in results {
        let error = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => PartitionError::Map(e),
            Err(payload) => PartitionError::Panicked(panic_message(&*payload).into_owned()),
        };

        #[cfg(feature = "logging")]
        log::warn!("A bulk insert partition failed: {}", error);

        failed += 1;
        first.get_or_insert(error);
    }

    match first {
        None => Ok(()),
        Some(first) => Err(MapError::BulkInsert {
            partitions,
            failed,
            first: Box::new(first),
        }),
    }
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> Cow<'a, str> {
    // Try to downcast the payload into &str or String.
    (payload.downcast_ref::<&str>().map(|s| (*s).into()))
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str().into()))
        .unwrap_or(Cow::Borrowed("unknown panic payload"))
}

#[cfg(test)]
mod tests {
    use crate::{
        common::{
            concurrent::constants::PARALLEL_INSERT_THRESHOLD,
            error::{MapError, PartitionError},
        },
        executor::{CurrentThreadExecutor, Executor, Partition, ScopedThreadExecutor},
        Key, UuidIntMap,
    };

    use std::{any::Any, thread};

    const N: u128 = PARALLEL_INSERT_THRESHOLD as u128 * 2;

    fn entries(n: u128) -> Vec<(Key, i32)> {
        (0..n).map(|k| (Key::from_u128(k), k as i32)).collect()
    }

    #[test]
    fn entries_in_parallel() {
        let map = UuidIntMap::new();
        map.bulk_insert_entries_parallel(&entries(N), 4, &ScopedThreadExecutor)
            .unwrap();

        assert_eq!(map.len(), N as usize);
        assert!((0..N).all(|k| map.get(Key::from_u128(k)) == Some(k as i32)));
    }

    #[test]
    fn map_in_parallel() {
        let source = UuidIntMap::new();
        source.insert_all(entries(N)).unwrap();

        let target = UuidIntMap::new();
        target.put(Key::from_u128(N), -1).unwrap();
        target
            .bulk_insert_parallel(&source, 3, &ScopedThreadExecutor)
            .unwrap();

        assert_eq!(target.len(), N as usize + 1);
        assert!((0..N).all(|k| target.get(Key::from_u128(k)) == Some(k as i32)));
    }

    #[test]
    fn small_inputs_run_sequentially() {
        let map = UuidIntMap::new();
        map.bulk_insert_entries_parallel(&entries(100), 8, &CurrentThreadExecutor)
            .unwrap();
        assert_eq!(map.len(), 100);

        let copy = UuidIntMap::new();
        copy.bulk_insert_parallel(&map, 8, &CurrentThreadExecutor)
            .unwrap();
        assert!(copy.try_eq(&map).unwrap());
    }

    #[test]
    fn more_workers_than_work() {
        let source = UuidIntMap::new();
        source.insert_all(entries(N)).unwrap();

        let target = UuidIntMap::new();
        target
            .bulk_insert_parallel(&source, usize::MAX, &CurrentThreadExecutor)
            .unwrap();
        assert!(target.try_eq(&source).unwrap());

        let map = UuidIntMap::new();
        map.bulk_insert_entries_parallel(&entries(N), usize::MAX, &CurrentThreadExecutor)
            .unwrap();
        assert_eq!(map.len(), N as usize);
    }

    /// Runs the partitions, then makes the second one fail.
    struct FailingExecutor;

    impl Executor for FailingExecutor {
        fn execute_all<'a>(
            &self,
            partitions: Vec<Partition<'a>>,
        ) -> Vec<thread::Result<crate::Result<()>>> {
            let mut results = CurrentThreadExecutor.execute_all(partitions);
            results[1] = Err(Box::new("worker lost") as Box<dyn Any + Send>);
            results
        }
    }

    #[test]
    fn failed_partitions_are_reported() {
        let map = UuidIntMap::new();
        let result = map.bulk_insert_entries_parallel(&entries(N), 4, &FailingExecutor);

        match result {
            Err(MapError::BulkInsert {
                partitions,
                failed,
                first,
            }) => {
                assert_eq!(partitions, 4);
                assert_eq!(failed, 1);
                assert!(matches!(*first, PartitionError::Panicked(ref m) if m == "worker lost"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // Partitions that ran are not rolled back.
        assert_eq!(map.len(), N as usize);
    }
}
