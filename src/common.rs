pub(crate) mod concurrent;
pub(crate) mod error;

use self::concurrent::constants::{DEFAULT_TRANSFER_CHUNK, MAXIMUM_CAPACITY};

#[derive(Clone, Debug)]
pub(crate) struct ResizeConfig {
    /// The largest bucket count the table may grow to. A power of two.
    /// Default: `MAXIMUM_CAPACITY`.
    pub(crate) max_capacity: usize,
    /// The number of buckets a helper claims at once during a resize. A power
    /// of two. Default: `DEFAULT_TRANSFER_CHUNK`.
    pub(crate) transfer_chunk: usize,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_capacity: MAXIMUM_CAPACITY,
            transfer_chunk: *DEFAULT_TRANSFER_CHUNK,
        }
    }
}

pub(crate) fn available_parallelism() -> usize {
    use std::{num::NonZeroUsize, thread::available_parallelism};
    available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}
