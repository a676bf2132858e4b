//! SSTable lifecycle: the level map, startup loading, flushes, and point
//! lookups across levels. Compaction lives in [`crate::compaction`] but
//! operates on the same state under the same lock.

use anyhow::{Context, Result};
use memtable::SkipList;
use parking_lot::RwLock;
use sstable::{BlockCache, SstReader, SstWriter};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// One level's files, keyed by numeric id so descending iteration is
/// newest-first (a filename-string order would put `0-10.sst` before
/// `0-9.sst`).
pub(crate) type Level = BTreeMap<u64, Arc<SstReader>>;

/// Owns every open SSTable reader and the physical `.sst` files.
///
/// The `levels` RwLock is the metadata lock: lookups hold it shared, flush
/// publication and the whole of compaction hold it exclusive, so readers
/// observe either the pre- or post-compaction file set, never a mixture.
pub struct SstManager {
    sst_dir: PathBuf,
    pub(crate) levels: RwLock<BTreeMap<u32, Level>>,
    next_sstable_id: AtomicU64,
    pub(crate) cache: Arc<BlockCache>,
    pub(crate) l0_compaction_threshold: usize,
}

impl SstManager {
    pub fn new<P: AsRef<Path>>(
        sst_dir: P,
        cache: Arc<BlockCache>,
        l0_compaction_threshold: usize,
    ) -> Self {
        Self {
            sst_dir: sst_dir.as_ref().to_path_buf(),
            levels: RwLock::new(BTreeMap::new()),
            next_sstable_id: AtomicU64::new(0),
            cache,
            l0_compaction_threshold,
        }
    }

    /// Discovers existing SSTables at startup.
    ///
    /// Creates the directory, sweeps `.tmp` leftovers from interrupted
    /// writes, then opens a reader per `<level>-<id>.sst` file. A file that
    /// fails to open (bad magic, truncated index) is logged and skipped;
    /// one corrupt table must not take the store down.
    pub fn load_sstables(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sst_dir)
            .with_context(|| format!("failed to create {}", self.sst_dir.display()))?;

        let mut loaded = 0usize;
        let mut levels = self.levels.write();

        for entry in std::fs::read_dir(&self.sst_dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };

            if name.ends_with(".tmp") {
                let _ = std::fs::remove_file(&path);
                continue;
            }

            let (level, id) = match parse_sst_filename(name) {
                Some(parsed) => parsed,
                None => continue,
            };

            self.next_sstable_id.fetch_max(id + 1, Ordering::SeqCst);

            match SstReader::open(&path, Arc::clone(&self.cache)) {
                Ok(reader) => {
                    levels.entry(level).or_default().insert(id, Arc::new(reader));
                    loaded += 1;
                }
                Err(e) => {
                    warn!("skipping unreadable sstable {}: {:#}", path.display(), e);
                }
            }
        }

        info!("loaded {} sstables from {}", loaded, self.sst_dir.display());
        Ok(())
    }

    /// Point lookup across all levels.
    ///
    /// L0 files may overlap, so they are consulted newest-id-first and the
    /// first hit wins. Files in L1 and below are disjoint within their
    /// level; only the one whose key range contains the probe is read.
    /// Returns the raw stored value -- the store maps tombstones to
    /// "not found".
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let levels = self.levels.read();

        if let Some(l0) = levels.get(&0) {
            for reader in l0.values().rev() {
                if let Some(value) = reader.get(key)? {
                    return Ok(Some(value));
                }
            }
        }

        for (_, files) in levels.range(1..) {
            for reader in files.values() {
                if reader.key_in_range(key) {
                    if let Some(value) = reader.get(key)? {
                        return Ok(Some(value));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Serializes a frozen memtable to a new L0 SSTable and publishes it.
    ///
    /// Empty memtables are skipped. The file is fully written and fsynced
    /// before the reader becomes visible under the write lock.
    pub fn flush_memtable(&self, mem: &SkipList) -> Result<()> {
        if mem.is_empty() {
            return Ok(());
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let name = sst_filename(0, id);
        let path = self.sst_dir.join(&name);

        let entries = SstWriter::write_from_memtable(&path, mem)?;
        let reader = SstReader::open(&path, Arc::clone(&self.cache))?;

        self.levels
            .write()
            .entry(0)
            .or_default()
            .insert(id, Arc::new(reader));

        info!("flushed memtable: {} entries -> {}", entries, name);
        Ok(())
    }

    /// Closes every reader. Further lookups see an empty tree.
    pub fn close(&self) {
        let mut levels = self.levels.write();
        levels.clear();
        info!("sstable manager closed");
    }

    pub(crate) fn sst_dir(&self) -> &Path {
        &self.sst_dir
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.next_sstable_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of files in `level`.
    pub fn level_file_count(&self, level: u32) -> usize {
        self.levels.read().get(&level).map_or(0, |l| l.len())
    }
}

/// `<level>-<id>.sst`
pub(crate) fn sst_filename(level: u32, id: u64) -> String {
    format!("{}-{}.sst", level, id)
}

/// Parses `<level>-<id>.sst`; anything else is not ours.
pub(crate) fn parse_sst_filename(name: &str) -> Option<(u32, u64)> {
    let stem = name.strip_suffix(".sst")?;
    let (level, id) = stem.split_once('-')?;
    Some((level.parse().ok()?, id.parse().ok()?))
}
