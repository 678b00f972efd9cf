use super::UuidIntMap;
use crate::{
    common::{concurrent::constants::MAX_PRESIZED_ENTRIES, error::Result},
    Key,
};

use std::io::{self, Read, Write};

const RECORD_LEN: usize = 8 + 8 + 4;

impl UuidIntMap {
    /// Writes the entries of the map to `writer` in a compact binary form.
    ///
    /// The output is the number of entries as a big-endian `i32`, followed by
    /// one 20-byte record per entry: the most significant and least
    /// significant halves of the key as big-endian `u64`s, then the value as
    /// a big-endian `i32`. [`read_from`](#method.read_from) reads it back.
    ///
    /// Writes are not buffered; wrap `writer` in a `BufWriter` if needed.
    ///
    /// # Errors
    ///
    /// Fails with [`MapError::ConcurrentModification`][conc-mod] without
    /// writing anything if the map is resized while its entries are
    /// collected, and with [`MapError::Io`][io] if writing fails.
    ///
    /// [conc-mod]: ./enum.MapError.html#variant.ConcurrentModification
    /// [io]: ./enum.MapError.html#variant.Io
    pub fn write_to(&self, mut writer: impl Write) -> Result<()> {
        let mut entries = Vec::with_capacity(self.len());
        self.try_for_each(|key, value| {
            entries.push((key, value));
            Ok(())
        })?;

        let count = i32::try_from(entries.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "too many entries for the binary format",
            )
        })?;
        writer.write_all(&count.to_be_bytes())?;

        let mut record = [0u8; RECORD_LEN];
        for (key, value) in entries {
            record[0..8].copy_from_slice(&key.msb().to_be_bytes());
            record[8..16].copy_from_slice(&key.lsb().to_be_bytes());
            record[16..20].copy_from_slice(&value.to_be_bytes());
            writer.write_all(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Reads a map written by [`write_to`](#method.write_to).
    ///
    /// A key that occurs more than once keeps its last value.
    ///
    /// # Errors
    ///
    /// Fails with [`MapError::Io`][io] if reading fails, if the input ends
    /// early, or if the entry count is negative.
    ///
    /// [io]: ./enum.MapError.html#variant.Io
    pub fn read_from(mut reader: impl Read) -> Result<UuidIntMap> {
        let mut count = [0u8; 4];
        reader.read_exact(&mut count)?;
        let count = i32::from_be_bytes(count);
        let count = usize::try_from(count).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("negative entry count: {count}"),
            )
        })?;

        // The count is not trusted for the initial allocation.
        let map = UuidIntMap::with_capacity(count.min(MAX_PRESIZED_ENTRIES));

        let mut record = [0u8; RECORD_LEN];
        for _ in 0..count {
            reader.read_exact(&mut record)?;
            let msb = u64::from_be_bytes(read_array(&record[0..8]));
            let lsb = u64::from_be_bytes(read_array(&record[8..16]));
            let value = i32::from_be_bytes(read_array(&record[16..20]));
            map.put(Key::new(msb, lsb), value)?;
        }

        Ok(map)
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(bytes);
    array
}
