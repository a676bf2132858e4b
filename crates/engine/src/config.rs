//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Memtable byte size at which the active memtable is rotated.
pub const DEFAULT_MEMTABLE_THRESHOLD: usize = 4 * 1024 * 1024;

/// Number of L0 SSTables at which compaction fires.
pub const DEFAULT_L0_COMPACTION_THRESHOLD: usize = 4;

/// How often the background compactor checks the L0 population.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum number of data blocks held by the shared block cache.
pub const DEFAULT_BLOCK_CACHE_ENTRIES: usize = 1_000_000;

/// Everything the store needs to know at open time.
///
/// `data_dir` is the root; the WAL lives at `<data_dir>/wal.log` and
/// SSTables under `<data_dir>/sst/`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub memtable_threshold: usize,
    pub l0_compaction_threshold: usize,
    pub compaction_interval: Duration,
    pub block_cache_entries: usize,
    /// fsync every WAL append. Turning this off trades the durability
    /// contract for write throughput; tests use it to keep suites fast.
    pub wal_sync: bool,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            memtable_threshold: DEFAULT_MEMTABLE_THRESHOLD,
            l0_compaction_threshold: DEFAULT_L0_COMPACTION_THRESHOLD,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            block_cache_entries: DEFAULT_BLOCK_CACHE_ENTRIES,
            wal_sync: true,
        }
    }

    pub fn sst_dir(&self) -> PathBuf {
        self.data_dir.join("sst")
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(wal::WAL_FILE_NAME)
    }

    pub fn with_memtable_threshold(mut self, bytes: usize) -> Self {
        self.memtable_threshold = bytes;
        self
    }

    pub fn with_l0_compaction_threshold(mut self, files: usize) -> Self {
        self.l0_compaction_threshold = files;
        self
    }

    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn with_wal_sync(mut self, sync: bool) -> Self {
        self.wal_sync = sync;
        self
    }
}
