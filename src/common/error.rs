use std::io;

/// The error type for the fallible operations of
/// [`UuidIntMap`][map].
///
/// Races between threads operating on the same bucket are retried internally
/// and never reported here.
///
/// [map]: ./struct.UuidIntMap.html
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    /// An insertion pushed the table over its fill factor, but doubling it
    /// would exceed the maximum capacity.
    ///
    /// The insertion that triggered the growth has already been applied; the
    /// table stays valid and keeps accepting entries with longer chains.
    #[error("cannot grow the table beyond its maximum capacity of {max_capacity} buckets")]
    CapacityExceeded { max_capacity: usize },

    /// A whole-table scan found a bucket that is being moved to a larger
    /// table. Scans of this kind need a stable table layout, so they stop
    /// instead of returning a partial result.
    #[error("the table was resized while a whole-table scan was in progress")]
    ConcurrentModification,

    /// At least one partition of a parallel bulk insert failed. Entries
    /// inserted by the other partitions are kept.
    #[error("{failed} of {partitions} bulk insert partitions failed")]
    BulkInsert {
        partitions: usize,
        failed: usize,
        #[source]
        first: Box<PartitionError>,
    },

    /// Reading or writing the binary entry format failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The reason a single partition of a parallel bulk insert failed.
#[derive(thiserror::Error, Debug)]
pub enum PartitionError {
    #[error(transparent)]
    Map(MapError),

    #[error("a bulk insert worker panicked: {0}")]
    Panicked(String),
}

pub type Result<T, E = MapError> = std::result::Result<T, E>;
