#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! A lock-free concurrent hash map from 128-bit keys to `i32` values.
//!
//! [`UuidIntMap`][map-struct] stores each key as its two 64-bit halves, so
//! keys are plain values compared by content. Retrievals never block and
//! updates never take a lock; threads that race on the same bucket retry with
//! a compare-and-swap. The bucket table grows by doubling, and every thread
//! that runs into a resize helps moving buckets instead of waiting for it.
//!
//! # Examples
//!
//! ```rust
//! use uuid_int_map::{Key, UuidIntMap};
//!
//! let map = UuidIntMap::new();
//! let key = Key::from(uuid::Uuid::new_v4());
//!
//! assert_eq!(map.put(key, 1).unwrap(), None);
//! assert_eq!(map.put_if_absent(key, 2).unwrap(), Some(1));
//! assert_eq!(map.get(key), Some(1));
//!
//! assert!(map.replace_if(key, 1, 3));
//! assert_eq!(map.remove(key), Some(3));
//! assert!(map.is_empty());
//! ```
//!
//! # Crate features
//!
//! - `logging`: emits `log` records when the table grows, when it cannot
//!   grow any further, and when a partition of a parallel bulk insert fails.
//!
//! [map-struct]: ./struct.UuidIntMap.html

pub(crate) mod builder;
pub(crate) mod cht;
pub(crate) mod common;
pub mod executor;
pub(crate) mod key;
pub(crate) mod map;

pub use crate::{
    builder::UuidIntMapBuilder,
    cht::iter::{Iter, Keys, Values},
    common::error::{MapError, PartitionError, Result},
    executor::{CurrentThreadExecutor, Executor, Partition, ScopedThreadExecutor},
    key::Key,
    map::UuidIntMap,
};
