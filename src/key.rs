use std::fmt;

use uuid::Uuid;

/// A 128-bit identifier used as the key of a [`UuidIntMap`][map].
///
/// The identifier is kept as its two 64-bit halves. Keys are plain values:
/// two keys are the same key when both halves are equal, regardless of where
/// they came from.
///
/// [map]: ./struct.UuidIntMap.html
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    msb: u64,
    lsb: u64,
}

impl Key {
    /// Creates a key from its most and least significant 64-bit halves.
    #[inline]
    pub const fn new(msb: u64, lsb: u64) -> Self {
        Self { msb, lsb }
    }

    #[inline]
    pub const fn from_u128(v: u128) -> Self {
        Self::new((v >> 64) as u64, v as u64)
    }

    #[inline]
    pub const fn as_u128(self) -> u128 {
        ((self.msb as u128) << 64) | self.lsb as u128
    }

    #[inline]
    pub const fn msb(self) -> u64 {
        self.msb
    }

    #[inline]
    pub const fn lsb(self) -> u64 {
        self.lsb
    }

    /// Folds both halves into 32 bits. This is the per-key contribution to
    /// [`UuidIntMap::content_hash`][content-hash].
    ///
    /// [content-hash]: ./struct.UuidIntMap.html#method.content_hash
    #[inline]
    pub const fn fold32(self) -> i32 {
        let x = self.msb ^ self.lsb;
        ((x >> 32) as i32) ^ (x as i32)
    }

    /// Spreads the folded key so that the low-order bits, which select the
    /// bucket, depend on every bit of the key.
    #[inline]
    pub(crate) const fn spread_hash(self) -> u32 {
        let mut h = self.fold32() as u32;
        h ^= (h >> 20) ^ (h >> 12);
        h ^ (h >> 7) ^ (h >> 4)
    }
}

impl From<Uuid> for Key {
    fn from(uuid: Uuid) -> Self {
        Self::from_u128(uuid.as_u128())
    }
}

impl From<Key> for Uuid {
    fn from(key: Key) -> Self {
        Uuid::from_u128(key.as_u128())
    }
}

impl From<u128> for Key {
    fn from(v: u128) -> Self {
        Self::from_u128(v)
    }
}

impl From<Key> for u128 {
    fn from(key: Key) -> Self {
        key.as_u128()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from(*self).hyphenated(), f)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}
