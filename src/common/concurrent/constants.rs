use once_cell::sync::Lazy;

/// Number of buckets in a table created without a capacity hint.
pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// The largest bucket count a table may grow to. Must be a power of two.
pub(crate) const MAXIMUM_CAPACITY: usize = 1 << 29;

/// Once a resize announces a destination table with at least this many
/// buckets, the size tracker switches to partitioned counters.
pub(crate) const PARTITIONED_SIZE_THRESHOLD: usize = 4096;

/// Number of partitioned size counters. Must be a power of two.
pub(crate) const SIZE_BUCKETS: usize = 8;

/// Below this many entries a parallel bulk insert runs on the calling thread.
pub(crate) const PARALLEL_INSERT_THRESHOLD: usize = 4096;

/// The largest entry count `read_from` sizes a new map for up front.
pub(crate) const MAX_PRESIZED_ENTRIES: usize = 1 << 16;

// min(1024, highest_one_bit(cpus) * 16)
pub(crate) static DEFAULT_TRANSFER_CHUNK: Lazy<usize> = Lazy::new(|| {
    let cpus = super::super::available_parallelism();
    let highest_one_bit = 1usize << (usize::BITS - 1 - cpus.leading_zeros());
    (highest_one_bit << 4).min(1024)
});
