//! A lock-free hash table with separately chained, immutable buckets.
//!
//! The core of the table is a bucket table: a power-of-two sized array of
//! atomic pointers to entry chains, plus an atomic pointer to the resize
//! coordinator of the table, if any. In the context of this crate, an atomic
//! pointer is a nullable, tagged pointer that is accessed and manipulated
//! using atomic memory operations and reclaimed through `crossbeam-epoch`.
//!
//! Entries are immutable once published. Every mutation of a bucket builds a
//! new chain that reuses the unchanged suffix of the old one, then swings the
//! bucket pointer from the old head to the new head with a single CAS. If the
//! CAS fails, another thread changed the bucket first and the operation reads
//! the bucket again and starts over. The nodes that fell out of the chain are
//! handed to the epoch collector, so readers that loaded the old head keep a
//! valid chain until they unpin.
//!
//! Growing the table is incremental and cooperative. The thread whose
//! insertion takes the table over its fill factor allocates a destination
//! table twice as large and publishes a resize coordinator on the source
//! table. It then walks the source buckets front to back, moving each chain:
//! the bucket pointer is CAS'd to a null pointer with the `RESIZING` tag, the
//! entries are copied into the destination, and the pointer is set to a null
//! pointer with the `RESIZED` tag. Empty buckets are CAS'd straight to
//! `RESIZED`.
//!
//! Any thread that reads a tagged bucket knows that a resize is in flight. It
//! joins the resize by claiming chunks of buckets from the back of the source
//! table, so that the owner and the helpers converge from opposite ends
//! without overlapping, and it waits until its own bucket is `RESIZED` before
//! retrying against the destination table. The owner waits for every helper
//! to leave before it installs the destination as the current table.
//!
//! Since every key lives in exactly one bucket of the current table and a
//! bucket can only change through a CAS on its head, operations on a single
//! key are linearizable. Nothing stronger than that is provided across keys.

pub(crate) mod iter;
pub(crate) mod map;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_util;
