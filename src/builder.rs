use crate::{
    common::{concurrent::constants::MAXIMUM_CAPACITY, ResizeConfig},
    UuidIntMap,
};

/// Builds a [`UuidIntMap`][map-struct] with various configuration knobs.
///
/// [map-struct]: ./struct.UuidIntMap.html
///
/// # Examples
///
/// ```rust
/// use uuid_int_map::{Key, UuidIntMap};
///
/// let map = UuidIntMap::builder()
///     // Room for 10,000 entries before the first resize.
///     .initial_capacity(10_000)
///     // Never grow beyond 1Mi buckets.
///     .max_capacity(1024 * 1024)
///     // Create the map.
///     .build();
///
/// map.put(Key::new(0, 1), 1).unwrap();
/// assert_eq!(map.capacity(), 16 * 1024);
/// ```
///
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct UuidIntMapBuilder {
    initial_capacity: Option<usize>,
    max_capacity: Option<usize>,
    transfer_chunk: Option<usize>,
}

impl UuidIntMapBuilder {
    /// Sets the number of entries the map can hold before its first resize.
    /// The table gets the smallest power-of-two bucket count that keeps that
    /// many entries at or below the fill factor of three quarters.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            initial_capacity: Some(capacity),
            ..self
        }
    }

    /// Sets the largest number of buckets the table may grow to, rounded up
    /// to a power of two and capped at 2^29.
    ///
    /// Once the table has this many buckets, insertions that would grow it
    /// further still succeed but report
    /// [`MapError::CapacityExceeded`][cap].
    ///
    /// [cap]: ./enum.MapError.html#variant.CapacityExceeded
    pub fn max_capacity(self, max_capacity: usize) -> Self {
        Self {
            max_capacity: Some(max_capacity),
            ..self
        }
    }

    /// Sets the number of buckets a thread claims at a time when it helps a
    /// resize, rounded up to a power of two.
    ///
    /// The default is 16 per available CPU, rounded down to a power of two,
    /// and at most 1024.
    pub fn transfer_chunk(self, chunk: usize) -> Self {
        Self {
            transfer_chunk: Some(chunk),
            ..self
        }
    }

    /// Builds a `UuidIntMap`.
    pub fn build(self) -> UuidIntMap {
        let mut config = ResizeConfig::default();

        if let Some(max_capacity) = self.max_capacity {
            config.max_capacity = max_capacity
                .clamp(1, MAXIMUM_CAPACITY)
                .next_power_of_two();
        }
        if let Some(chunk) = self.transfer_chunk {
            config.transfer_chunk = chunk.clamp(1, MAXIMUM_CAPACITY).next_power_of_two();
        }

        UuidIntMap::with_everything(self.initial_capacity, config)
    }
}
