//! Write path: `put`, `delete`, and memtable rotation.
//!
//! Every mutation is appended to the WAL before it touches the memtable,
//! both under the memtable-switch shared lock. Rotation upgrades to the
//! exclusive lock, re-checks the threshold (another writer may have rotated
//! first), freezes the active memtable into the immutable queue, installs a
//! fresh one, and rotates the WAL epoch with it.

use anyhow::{bail, ensure, Result};
use memtable::{SkipList, TOMBSTONE};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::LsmStore;

impl LsmStore {
    /// Inserts or updates a key-value pair.
    ///
    /// Durable on return: the WAL append is synced before the in-memory
    /// insert, and the insert completes before the call returns, so a
    /// subsequent `get` from any thread observes the write.
    ///
    /// # Errors
    ///
    /// Fails when the store is shutting down, on an empty key or value,
    /// and on WAL I/O errors.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            bail!("store is shutting down; writes are rejected");
        }
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(!value.is_empty(), "value must not be empty");

        let needs_rotation = {
            let mem = self.active.read();
            self.wal.log_put(key, value)?;
            mem.insert(key, value);
            mem.approximate_size() >= self.config.memtable_threshold
        };

        if needs_rotation {
            self.switch_memtable()?;
        }
        Ok(())
    }

    /// Deletes a key by storing the tombstone sentinel.
    ///
    /// The tombstone flows through flush and compaction like any other
    /// version, shadowing older values until compaction drops both.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.put(key, TOMBSTONE)
    }

    /// Freezes the active memtable and starts a new epoch.
    ///
    /// Double-checks the threshold under the exclusive lock: by the time a
    /// writer gets here, another writer may have already rotated.
    fn switch_memtable(&self) -> Result<()> {
        let mut active = self.active.write();

        if active.approximate_size() < self.config.memtable_threshold || active.is_empty() {
            return Ok(());
        }

        info!(
            "rotating memtable: {} entries, ~{} bytes",
            active.len(),
            active.approximate_size()
        );

        self.immutables.write().push_back(Arc::clone(&active));
        *active = Arc::new(SkipList::new());
        self.wal.rotate()?;
        Ok(())
    }
}
