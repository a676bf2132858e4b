//! SSTable writers: one for frozen memtables, one streaming variant fed an
//! already-sorted entry stream (used by compaction).

use anyhow::{Context, Result};
use bloom::BloomFilter;
use byteorder::{BigEndian, WriteBytesExt};
use memtable::SkipList;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use crate::format::{write_footer, write_index, IndexEntry, DATA_BLOCK_SIZE_TARGET};

/// Bloom filter false-positive target for every SSTable.
const BLOOM_FPP: f64 = 0.01;

/// Streams sorted entries into an SSTable.
///
/// Writes to `<path>.tmp` and renames into place on [`finish`], after
/// `fsync`, so a crash mid-write leaves no partial `.sst` behind (leftover
/// `.tmp` files are swept at startup). Callers must append keys in strictly
/// ascending order; both call sites (memtable traversal and the compaction
/// merge) do so by construction.
///
/// [`finish`]: SstStreamWriter::finish
pub struct SstStreamWriter {
    file: BufWriter<File>,
    final_path: PathBuf,
    tmp_path: PathBuf,
    bloom: BloomFilter,
    index: Vec<IndexEntry>,
    /// Bytes written to the data section so far.
    offset: u64,
    block_start: u64,
    block_size: usize,
    last_key_in_block: Option<String>,
    entries: u64,
}

impl SstStreamWriter {
    /// Creates the temp file and sizes the bloom filter for
    /// `expected_entries` insertions.
    pub fn create<P: AsRef<Path>>(path: P, expected_entries: usize) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = tmp_path_for(&final_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;

        Ok(Self {
            file: BufWriter::new(file),
            final_path,
            tmp_path,
            bloom: BloomFilter::new(expected_entries, BLOOM_FPP),
            index: Vec::new(),
            offset: 0,
            block_start: 0,
            block_size: 0,
            last_key_in_block: None,
            entries: 0,
        })
    }

    /// Appends one entry to the data section.
    ///
    /// The current block is sealed once its running size (`8 + |key| +
    /// |value|` per entry) has reached the 4 KiB target; the first entry of
    /// a block is always admitted, so no block is ever empty.
    pub fn append(&mut self, key: &str, value: &str) -> Result<()> {
        if self.block_size >= DATA_BLOCK_SIZE_TARGET {
            self.seal_block();
        }

        let key_bytes = key.as_bytes();
        let value_bytes = value.as_bytes();

        self.file.write_u32::<BigEndian>(key_bytes.len() as u32)?;
        self.file.write_all(key_bytes)?;
        self.file.write_u32::<BigEndian>(value_bytes.len() as u32)?;
        self.file.write_all(value_bytes)?;

        self.bloom.insert(key);

        let written = 8 + key_bytes.len() + value_bytes.len();
        self.offset += written as u64;
        self.block_size += written;
        self.last_key_in_block = Some(key.to_string());
        self.entries += 1;
        Ok(())
    }

    /// Records the finished block's last key and extent in the index.
    fn seal_block(&mut self) {
        if let Some(last_key) = self.last_key_in_block.take() {
            self.index.push(IndexEntry {
                last_key,
                offset: self.block_start,
                size: (self.offset - self.block_start) as u32,
            });
            self.block_start = self.offset;
            self.block_size = 0;
        }
    }

    /// Writes index, bloom filter and footer, fsyncs, and renames the temp
    /// file into place. Returns the number of entries written.
    ///
    /// A zero-entry table is never published: the temp file is deleted and
    /// `Ok(0)` returned, so callers skip the reader entirely.
    pub fn finish(mut self) -> Result<u64> {
        self.seal_block();

        if self.entries == 0 {
            drop(self.file);
            std::fs::remove_file(&self.tmp_path)
                .with_context(|| format!("failed to remove empty {}", self.tmp_path.display()))?;
            return Ok(0);
        }

        let index_offset = self.file.stream_position()?;
        write_index(&mut self.file, &self.index)?;

        let bloom_offset = self.file.stream_position()?;
        self.bloom.write_to(&mut self.file)?;

        write_footer(&mut self.file, index_offset, bloom_offset)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        drop(self.file);

        std::fs::rename(&self.tmp_path, &self.final_path).with_context(|| {
            format!(
                "failed to publish {} as {}",
                self.tmp_path.display(),
                self.final_path.display()
            )
        })?;

        Ok(self.entries)
    }
}

/// Serializes frozen memtables into SSTables.
pub struct SstWriter;

impl SstWriter {
    /// Writes the entire memtable to `path` in key order.
    pub fn write_from_memtable<P: AsRef<Path>>(path: P, mem: &SkipList) -> Result<u64> {
        let mut writer = SstStreamWriter::create(path, mem.len() as usize)?;
        mem.for_each(|k, v| writer.append(k, v))?;
        writer.finish()
    }
}

/// The in-progress sibling of an SSTable path: `0-12.sst` -> `0-12.sst.tmp`.
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
