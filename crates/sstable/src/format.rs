//! Shared constants and footer/index serialization for the SSTable format.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Seek, SeekFrom, Write};

/// Magic number terminating every well-formed SSTable.
pub const SSTABLE_MAGIC: u64 = 0x1234_5678_9ABC_DEF0;

/// Footer layout: `index_offset (u64) + bloom_offset (u64) + magic (u64)`.
pub const FOOTER_BYTES: u64 = 24;

/// Target size of a data block. Entries are appended until the running
/// block size reaches this value, then a new block starts.
pub const DATA_BLOCK_SIZE_TARGET: usize = 4 * 1024;

/// One index record: the last key of a data block plus the block's extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub last_key: String,
    pub offset: u64,
    pub size: u32,
}

/// Writes the 24-byte footer.
pub fn write_footer<W: Write>(w: &mut W, index_offset: u64, bloom_offset: u64) -> IoResult<()> {
    w.write_u64::<BigEndian>(index_offset)?;
    w.write_u64::<BigEndian>(bloom_offset)?;
    w.write_u64::<BigEndian>(SSTABLE_MAGIC)?;
    Ok(())
}

/// Reads the footer from the end of the file.
///
/// Returns `(index_offset, bloom_offset, magic)`; the caller validates the
/// magic so it can phrase the error with file context.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<(u64, u64, u64)> {
    let filesize = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(filesize.saturating_sub(FOOTER_BYTES)))?;
    let index_offset = r.read_u64::<BigEndian>()?;
    let bloom_offset = r.read_u64::<BigEndian>()?;
    let magic = r.read_u64::<BigEndian>()?;
    Ok((index_offset, bloom_offset, magic))
}

/// Writes the index block: `count` then one record per data block.
pub fn write_index<W: Write>(w: &mut W, entries: &[IndexEntry]) -> IoResult<()> {
    w.write_u32::<BigEndian>(entries.len() as u32)?;
    for entry in entries {
        let key = entry.last_key.as_bytes();
        w.write_u32::<BigEndian>(key.len() as u32)?;
        w.write_all(key)?;
        w.write_u64::<BigEndian>(entry.offset)?;
        w.write_u32::<BigEndian>(entry.size)?;
    }
    Ok(())
}

/// Reads the index block written by [`write_index`].
///
/// `max_key_bytes` bounds a single key allocation so a corrupt count or
/// length cannot exhaust memory.
pub fn read_index<R: Read>(r: &mut R, max_key_bytes: usize) -> IoResult<Vec<IndexEntry>> {
    let count = r.read_u32::<BigEndian>()? as usize;
    let mut entries = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let key_len = r.read_u32::<BigEndian>()? as usize;
        if key_len > max_key_bytes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("corrupt index: key_len {} exceeds maximum {}", key_len, max_key_bytes),
            ));
        }
        let mut key = vec![0u8; key_len];
        r.read_exact(&mut key)?;
        let offset = r.read_u64::<BigEndian>()?;
        let size = r.read_u32::<BigEndian>()?;
        entries.push(IndexEntry {
            last_key: String::from_utf8_lossy(&key).into_owned(),
            offset,
            size,
        });
    }
    Ok(entries)
}
