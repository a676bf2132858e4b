//! Random-access SSTable reader for point lookups.

use anyhow::{bail, Context, Result};
use bloom::BloomFilter;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::format::{read_footer, read_index, IndexEntry, FOOTER_BYTES, SSTABLE_MAGIC};
use crate::iterator::SstIterator;

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
pub(crate) const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (10 MiB). Prevents OOM on corrupt files.
pub(crate) const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Reads one SSTable file.
///
/// On [`open`](SstReader::open) the footer is validated and the index and
/// bloom filter are loaded into memory; data blocks stay on disk and are
/// fetched through the shared [`BlockCache`] on demand.
///
/// The reader holds **no** persistent file handle. Every cache miss opens a
/// fresh handle for the single block read, so any number of `get` calls can
/// run concurrently against the same reader.
pub struct SstReader {
    path: PathBuf,
    /// One entry per data block: last key + extent, sorted by last key.
    index: Vec<IndexEntry>,
    /// `None` only for an empty (sub-footer-sized) file.
    bloom: Option<BloomFilter>,
    first_key: Option<String>,
    last_key: Option<String>,
    index_offset: u64,
    cache: Arc<BlockCache>,
}

impl SstReader {
    /// Opens an SSTable and loads its footer, bloom filter and index.
    ///
    /// A file shorter than the footer is treated as empty rather than
    /// corrupt: no bloom, no index, `first_key = last_key = None`.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad magic number, offsets pointing outside
    /// the file, or any I/O failure.
    pub fn open<P: AsRef<Path>>(path: P, cache: Arc<BlockCache>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file =
            File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let filesize = file.metadata()?.len();

        if filesize < FOOTER_BYTES {
            return Ok(Self {
                path,
                index: Vec::new(),
                bloom: None,
                first_key: None,
                last_key: None,
                index_offset: 0,
                cache,
            });
        }

        let (index_offset, bloom_offset, magic) = read_footer(&mut file)?;
        if magic != SSTABLE_MAGIC {
            bail!("invalid sstable file (bad magic): {}", path.display());
        }
        if index_offset >= filesize || bloom_offset >= filesize || index_offset > bloom_offset {
            bail!("corrupt sstable footer offsets: {}", path.display());
        }

        file.seek(SeekFrom::Start(bloom_offset))?;
        let bloom = BloomFilter::read_from(&mut file)
            .with_context(|| format!("failed to read bloom filter: {}", path.display()))?;

        file.seek(SeekFrom::Start(index_offset))?;
        let index = read_index(&mut file, MAX_KEY_BYTES)
            .with_context(|| format!("failed to read index: {}", path.display()))?;

        let first_key = if index.is_empty() {
            None
        } else {
            Some(read_first_key(&mut file)?)
        };
        let last_key = index.last().map(|e| e.last_key.clone());

        Ok(Self {
            path,
            index,
            bloom: Some(bloom),
            first_key,
            last_key,
            index_offset,
            cache,
        })
    }

    /// Point lookup for a single key.
    ///
    /// The bloom filter is consulted first; a negative answer skips all
    /// I/O. Otherwise the index locates the one candidate block, its bytes
    /// come from the shared cache (loading from disk on a miss), and a
    /// linear scan inside the block decides. Returns the stored value,
    /// which may be the tombstone sentinel -- mapping tombstones to
    /// "not found" is the engine's job.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let bloom = match &self.bloom {
            Some(b) => b,
            None => return Ok(None), // empty file
        };
        if !bloom.may_contain(key) {
            return Ok(None);
        }

        // First block whose last key is >= the probe owns the key range.
        let block_idx = self.index.partition_point(|e| e.last_key.as_str() < key);
        let entry = match self.index.get(block_idx) {
            Some(e) => e,
            None => return Ok(None),
        };

        let cache_key = block_cache_key(&self.path, entry.offset);
        let block = self
            .cache
            .get_or_load(&cache_key, || {
                let mut f = File::open(&self.path)?;
                f.seek(SeekFrom::Start(entry.offset))?;
                let mut buf = vec![0u8; entry.size as usize];
                f.read_exact(&mut buf)?;
                Ok(buf)
            })
            .with_context(|| format!("failed to load block from {}", self.path.display()))?;

        Ok(find_in_block(&block, key))
    }

    /// Sequential iterator over the data section, for compaction.
    pub fn iter(&self) -> Result<SstIterator> {
        SstIterator::new(self)
    }

    /// Drops every cached block of this file. Called right before the
    /// physical file is deleted by compaction.
    pub fn invalidate_cache(&self) {
        for entry in &self.index {
            self.cache.invalidate(&block_cache_key(&self.path, entry.offset));
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Smallest key in the file (`None` for an empty file).
    #[must_use]
    pub fn first_key(&self) -> Option<&str> {
        self.first_key.as_deref()
    }

    /// Largest key in the file (`None` for an empty file).
    #[must_use]
    pub fn last_key(&self) -> Option<&str> {
        self.last_key.as_deref()
    }

    /// Where the data section ends and the index begins.
    #[must_use]
    pub(crate) fn index_offset(&self) -> u64 {
        self.index_offset
    }

    /// Number of data blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// `true` if `key` falls within `[first_key, last_key]`.
    #[must_use]
    pub fn key_in_range(&self, key: &str) -> bool {
        match (&self.first_key, &self.last_key) {
            (Some(first), Some(last)) => key >= first.as_str() && key <= last.as_str(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for SstReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstReader")
            .field("path", &self.path)
            .field("blocks", &self.index.len())
            .field("first_key", &self.first_key)
            .field("last_key", &self.last_key)
            .finish()
    }
}

/// Cache key for one block: unique because SSTable filenames are never
/// reused after deletion (ids are monotonic).
fn block_cache_key(path: &Path, offset: u64) -> String {
    format!("{}:{}", path.display(), offset)
}

/// The first entry of the file starts at offset 0; its key is the file's
/// smallest key because the data section is sorted.
fn read_first_key(file: &mut File) -> Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let key_len = file.read_u32::<BigEndian>()? as usize;
    if key_len > MAX_KEY_BYTES {
        bail!("corrupt data: first key_len {} exceeds maximum {}", key_len, MAX_KEY_BYTES);
    }
    let mut key = vec![0u8; key_len];
    file.read_exact(&mut key)?;
    Ok(String::from_utf8_lossy(&key).into_owned())
}

/// Scans one block's length-prefixed tuples for `key`.
///
/// A truncated tuple ends the scan: this should not occur on a well-formed
/// file, but a defensive stop beats reading past the block.
fn find_in_block(block: &Bytes, key: &str) -> Option<String> {
    let mut buf: &[u8] = block;
    let probe = key.as_bytes();

    loop {
        if buf.len() < 4 {
            return None;
        }
        let key_len = buf.read_u32::<BigEndian>().ok()? as usize;
        if key_len > MAX_KEY_BYTES || buf.len() < key_len {
            return None;
        }
        let (current_key, rest) = buf.split_at(key_len);
        buf = rest;

        if buf.len() < 4 {
            return None;
        }
        let val_len = buf.read_u32::<BigEndian>().ok()? as usize;
        if val_len > MAX_VALUE_BYTES || buf.len() < val_len {
            return None;
        }

        if current_key == probe {
            return Some(String::from_utf8_lossy(&buf[..val_len]).into_owned());
        }
        buf = &buf[val_len..];
    }
}
