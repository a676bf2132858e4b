//! Sequential scan over one SSTable's data section.

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};

use crate::reader::{SstReader, MAX_KEY_BYTES, MAX_VALUE_BYTES};

/// Walks every `(key, value)` entry of an SSTable in file (= key) order.
///
/// Each iterator owns a private file handle, so any number of iterators can
/// run against the same table concurrently with point lookups. Compaction is
/// the only consumer; the handle closes on drop.
pub struct SstIterator {
    file: BufReader<File>,
    /// Byte position within the data section.
    current: u64,
    /// End of the data section: the index offset, or 0 for an empty table.
    end: u64,
}

impl SstIterator {
    pub(crate) fn new(reader: &SstReader) -> Result<Self> {
        let file = File::open(reader.path())
            .with_context(|| format!("failed to open {}", reader.path().display()))?;
        let end = if reader.is_empty() { 0 } else { reader.index_offset() };
        Ok(Self {
            file: BufReader::new(file),
            current: 0,
            end,
        })
    }

    /// `true` while entries remain in the data section.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.current < self.end
    }

    /// Returns the next entry, or `None` once the data section is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(String, String)>> {
        if !self.has_next() {
            return Ok(None);
        }

        let key_len = self.file.read_u32::<BigEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            bail!("corrupt data: key_len {} exceeds maximum {}", key_len, MAX_KEY_BYTES);
        }
        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;

        let val_len = self.file.read_u32::<BigEndian>()? as usize;
        if val_len > MAX_VALUE_BYTES {
            bail!("corrupt data: val_len {} exceeds maximum {}", val_len, MAX_VALUE_BYTES);
        }
        let mut value = vec![0u8; val_len];
        self.file.read_exact(&mut value)?;

        self.current += (8 + key_len + val_len) as u64;

        Ok(Some((
            String::from_utf8_lossy(&key).into_owned(),
            String::from_utf8_lossy(&value).into_owned(),
        )))
    }
}
