
use crate::StoreConfig;
use std::path::Path;
use std::time::{Duration, Instant};

/// A config tuned for tests: tiny memtable so rotation is easy to force,
/// fast compaction checks, no per-record fsync.
pub fn test_config(dir: &Path) -> StoreConfig {
    StoreConfig::new(dir)
        .with_memtable_threshold(512)
        .with_compaction_interval(Duration::from_millis(50))
        .with_wal_sync(false)
}

/// Polls `cond` until it holds or the deadline passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn count_sst_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}
