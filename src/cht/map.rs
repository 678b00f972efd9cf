//! A lock-free hash map implemented with a bucket table of immutable entry
//! chains and cooperative incremental resizing.

pub(crate) mod bucket_table;
pub(crate) mod entry;
pub(crate) mod resize;
pub(crate) mod size;
pub(crate) mod table_ref;
