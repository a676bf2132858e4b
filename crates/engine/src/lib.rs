//! # Engine - CrestKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`],
//! and [`sstable`] crates into a complete LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client threads
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                    LSM STORE                      │
//! │                                                   │
//! │ write.rs → WAL append → active memtable insert    │
//! │              |                                    │
//! │              |  (threshold crossed?)              │
//! │              v                                    │
//! │        switch_memtable() → immutable queue        │
//! │              |               + WAL rotation       │
//! │              v                                    │
//! │  [flush thread]  pops oldest → new L0 SSTable     │
//! │  [compaction thread]  L0 ≥ threshold → merged L1  │
//! │                                                   │
//! │ read.rs → active → frozen (newest first)          │
//! │            → L0 (newest first) → L1 (by range)    │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                            |
//! |----------------|----------------------------------------------------|
//! | `lib.rs`       | `LsmStore` struct, open/close, background flush    |
//! | [`config`]     | `StoreConfig` and defaults                         |
//! | [`manager`]    | level map, SSTable loading, flush, cross-level get |
//! | [`compaction`] | k-way merge compaction + background thread         |
//! | `write.rs`     | `put`, `delete`, memtable rotation                 |
//! | `read.rs`      | `get` across memtables and levels                  |
//! | `recovery.rs`  | WAL replay at startup                              |
//!
//! ## Crash Safety
//!
//! Every write hits the WAL (synced) before the memtable. The WAL is
//! rotated together with the memtable it covers, and SSTables are written
//! to a temp file, fsynced, and renamed before publication. On restart the
//! active WAL epoch is replayed and the `sst/` directory is rescanned;
//! levels are encoded in the filenames.

mod compaction;
mod config;
mod manager;
mod read;
mod recovery;
mod write;

pub use compaction::Compactor;
pub use config::{
    StoreConfig, DEFAULT_BLOCK_CACHE_ENTRIES, DEFAULT_COMPACTION_INTERVAL,
    DEFAULT_L0_COMPACTION_THRESHOLD, DEFAULT_MEMTABLE_THRESHOLD,
};
pub use manager::SstManager;
pub use memtable::TOMBSTONE;

use anyhow::{Context, Result};
use memtable::SkipList;
use parking_lot::{Mutex, RwLock};
use sstable::BlockCache;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How long the flush loop sleeps when the immutable queue is empty.
const FLUSH_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// How long `close` waits for the flush loop to drain.
const CLOSE_FLUSH_BUDGET: Duration = Duration::from_secs(10);

/// The embedded LSM-tree key-value store.
///
/// All methods take `&self`; the store is `Send + Sync` and is typically
/// wrapped in an `Arc` and shared across threads.
///
/// # Write Path
///
/// 1. Append the record to the WAL (synced - crash-safe durability).
/// 2. Insert into the active memtable.
/// 3. Past the size threshold, freeze the memtable into the immutable
///    queue, install a fresh one, rotate the WAL.
/// 4. A background thread flushes frozen memtables to L0 SSTables; another
///    compacts L0 into L1.
///
/// # Read Path
///
/// Active memtable, then frozen memtables newest-first, then L0 SSTables
/// newest-first, then L1+ by key range. First version wins; tombstones
/// read as "not found".
pub struct LsmStore {
    config: StoreConfig,
    /// The memtable-switch lock: shared for `put`/`get`, exclusive while
    /// rotating or draining at close.
    active: RwLock<Arc<SkipList>>,
    /// Frozen memtables in rotation order, oldest at the front.
    immutables: Arc<RwLock<VecDeque<Arc<SkipList>>>>,
    wal: Arc<wal::WalManager>,
    manager: Arc<SstManager>,
    shutting_down: Arc<AtomicBool>,
    flush_done: Arc<AtomicBool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    compactor: Mutex<Option<Compactor>>,
}

impl LsmStore {
    /// Opens (or creates) a store at `config.data_dir`, recovering any
    /// state a previous process left behind.
    ///
    /// # Startup Steps
    ///
    /// 1. Create the data directory.
    /// 2. Load existing SSTables (sweeping temp files; levels come from
    ///    the filenames).
    /// 3. Replay the active WAL epoch into a fresh memtable.
    /// 4. Open the WAL for appending.
    /// 5. Spawn the flush and compaction threads.
    pub fn open(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

        let cache = Arc::new(BlockCache::new(config.block_cache_entries));
        let manager = Arc::new(SstManager::new(
            config.sst_dir(),
            cache,
            config.l0_compaction_threshold,
        ));
        manager.load_sstables()?;

        let active = Arc::new(SkipList::new());
        let recovered = recovery::replay_wal(&config.wal_path(), &active)?;

        let wal = Arc::new(wal::WalManager::open(&config.data_dir, config.wal_sync)?);

        let store = Self {
            active: RwLock::new(active),
            immutables: Arc::new(RwLock::new(VecDeque::new())),
            wal,
            manager: Arc::clone(&manager),
            shutting_down: Arc::new(AtomicBool::new(false)),
            flush_done: Arc::new(AtomicBool::new(false)),
            flush_handle: Mutex::new(None),
            compactor: Mutex::new(None),
            config,
        };

        *store.flush_handle.lock() = Some(store.spawn_flush_thread()?);
        *store.compactor.lock() = Some(Compactor::start(
            manager,
            store.config.compaction_interval,
        )?);

        info!(
            "store opened at {} ({} records recovered from wal)",
            store.config.data_dir.display(),
            recovered
        );
        Ok(store)
    }

    /// The flush loop: pops the oldest frozen memtable and writes it to an
    /// L0 SSTable. Exits only when shutdown has begun *and* the queue is
    /// empty, so `close` can hand it the final memtable. Flush errors are
    /// logged and the loop continues; the data is still recoverable from
    /// its WAL epoch.
    fn spawn_flush_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let immutables = Arc::clone(&self.immutables);
        let manager = Arc::clone(&self.manager);
        let shutting_down = Arc::clone(&self.shutting_down);
        let flush_done = Arc::clone(&self.flush_done);

        std::thread::Builder::new()
            .name("crest-flush".to_string())
            .spawn(move || {
                loop {
                    let next = immutables.write().pop_front();
                    match next {
                        Some(mem) => {
                            if let Err(e) = manager.flush_memtable(&mem) {
                                error!("memtable flush failed: {:#}", e);
                            }
                        }
                        None => {
                            if shutting_down.load(Ordering::SeqCst) {
                                break;
                            }
                            std::thread::sleep(FLUSH_IDLE_SLEEP);
                        }
                    }
                }
                flush_done.store(true, Ordering::SeqCst);
                info!("flush thread exited");
            })
    }

    /// Shuts the store down, draining as much in-flight state as possible.
    ///
    /// 1. Reject new writes.
    /// 2. Stop the compactor (it runs one final compaction).
    /// 3. Freeze the active memtable so the flush loop picks it up.
    /// 4. Wait up to 10 s for the flush loop to drain; anything left
    ///    unflushed stays recoverable from its WAL epoch.
    /// 5. Sync the WAL and drop all SSTable readers.
    ///
    /// Idempotent: a second call returns immediately.
    pub fn close(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing store at {}", self.config.data_dir.display());

        if let Some(mut compactor) = self.compactor.lock().take() {
            compactor.stop();
        }

        {
            let mut active = self.active.write();
            if !active.is_empty() {
                self.immutables.write().push_back(Arc::clone(&active));
                *active = Arc::new(SkipList::new());
            }
        }

        let deadline = Instant::now() + CLOSE_FLUSH_BUDGET;
        while !self.flush_done.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        if self.flush_done.load(Ordering::SeqCst) {
            if let Some(handle) = self.flush_handle.lock().take() {
                let _ = handle.join();
            }
        } else {
            warn!("flush thread did not drain within 10s; unflushed data remains in the wal");
        }

        self.wal.sync_to_disk()?;
        self.manager.close();
        info!("store closed");
        Ok(())
    }

    /// Number of SSTables currently in `level`.
    #[must_use]
    pub fn level_file_count(&self, level: u32) -> usize {
        self.manager.level_file_count(level)
    }

    /// Number of frozen memtables awaiting flush.
    #[must_use]
    pub fn immutable_count(&self) -> usize {
        self.immutables.read().len()
    }

    /// Byte size of the active memtable (advisory).
    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.active.read().approximate_size()
    }
}

impl std::fmt::Debug for LsmStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmStore")
            .field("data_dir", &self.config.data_dir)
            .field("memtable_size", &self.memtable_size())
            .field("immutable_count", &self.immutable_count())
            .field("l0_files", &self.level_file_count(0))
            .field("l1_files", &self.level_file_count(1))
            .field("shutting_down", &self.shutting_down.load(Ordering::SeqCst))
            .finish()
    }
}

/// Best-effort shutdown on drop so background threads never outlive the
/// store. Errors are ignored; `close` is the intentional path.
impl Drop for LsmStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
