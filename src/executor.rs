//! Executors that run the partitions of a parallel bulk insert.

use crate::common::error::Result;

use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    thread,
};

/// One unit of work of a parallel bulk operation.
pub type Partition<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

/// Runs the partitions of a parallel bulk operation.
///
/// An executor must run every partition it is given and return once all of
/// them are done, with one result per partition in the order they were
/// given. A partition that panicked is reported as an `Err` holding the panic
/// payload, like [`std::thread::JoinHandle::join`] does.
pub trait Executor {
    fn execute_all<'a>(&self, partitions: Vec<Partition<'a>>) -> Vec<thread::Result<Result<()>>>;
}

/// Runs every partition on its own scoped thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScopedThreadExecutor;

impl Executor for ScopedThreadExecutor {
    fn execute_all<'a>(&self, partitions: Vec<Partition<'a>>) -> Vec<thread::Result<Result<()>>> {
        let count = partitions.len();

        let results = crossbeam_utils::thread::scope(|s| {
            let handles: Vec<_> = partitions
                .into_iter()
                .map(|partition| s.spawn(move |_| partition()))
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        });

        match results {
            Ok(results) => results,
            // Every thread was joined above, so the scope itself cannot see
            // a panic. Report it against every partition if it does anyway.
            Err(_) => (0..count)
                .map(|_| Err(Box::new("a scoped thread panicked") as Box<dyn Any + Send>))
                .collect(),
        }
    }
}

/// Runs the partitions one after another on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentThreadExecutor;

impl Executor for CurrentThreadExecutor {
    fn execute_all<'a>(&self, partitions: Vec<Partition<'a>>) -> Vec<thread::Result<Result<()>>> {
        partitions
            .into_iter()
            // A partition that panicked is not called again.
            .map(|partition| catch_unwind(AssertUnwindSafe(partition)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{CurrentThreadExecutor, Executor, Partition, ScopedThreadExecutor};
    use crate::common::error::{MapError, Result};

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn partitions(counter: &AtomicUsize) -> Vec<Partition<'_>> {
        let mut partitions: Vec<Partition<'_>> = Vec::new();
        partitions.push(Box::new(move || -> Result<()> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
        partitions.push(Box::new(|| -> Result<()> {
            Err(MapError::ConcurrentModification)
        }));
        partitions.push(Box::new(|| -> Result<()> { panic!("boom") }));
        partitions.push(Box::new(move || -> Result<()> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
        partitions
    }

    fn check(executor: &impl Executor) {
        let counter = AtomicUsize::new(0);
        let results = executor.execute_all(partitions(&counter));

        assert_eq!(results.len(), 4);
        assert!(matches!(results[0], Ok(Ok(()))));
        assert!(matches!(results[1], Ok(Err(MapError::ConcurrentModification))));
        assert!(results[2].is_err());
        assert!(matches!(results[3], Ok(Ok(()))));
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn scoped_threads() {
        check(&ScopedThreadExecutor);
    }

    #[test]
    fn current_thread() {
        check(&CurrentThreadExecutor);
    }
}
