//! L0 -> L1 compaction: the k-way merge and the background thread that
//! triggers it.
//!
//! Compaction merges every L0 table plus the overlapping slice of L1 into
//! one new L1 table, streaming block-by-block through [`SstIterator`]s and
//! a binary heap. Duplicate keys collapse to the newest version (largest
//! file id) and tombstones are discarded outright: L1 is the bottom level,
//! so there is nothing older left for a tombstone to shadow. A deeper tree
//! would have to retain tombstones until the last level.

use anyhow::{Context, Result};
use memtable::TOMBSTONE;
use parking_lot::{Condvar, Mutex};
use sstable::{SstIterator, SstReader, SstStreamWriter};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

use crate::manager::{sst_filename, SstManager};

/// Bloom sizing for a compaction output, whose cardinality is unknown until
/// the merge finishes.
const COMPACTION_BLOOM_CAPACITY: usize = 1_000_000;

/// One source's current entry in the merge heap.
///
/// `BinaryHeap` is a max-heap, so the ordering is reversed on the key to
/// pop the smallest key first; ties break toward the larger file id so the
/// newest version of a key surfaces before older ones.
struct HeapEntry {
    key: String,
    value: String,
    file_id: u64,
    /// Index into the iterator array, to advance the right source.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.file_id == other.file_id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.file_id.cmp(&other.file_id))
    }
}

impl SstManager {
    /// Merges L0 (plus overlapping L1 files) into a new L1 table.
    ///
    /// A no-op unless L0 holds at least the configured threshold of files.
    /// Runs entirely under the metadata write lock: concurrent lookups see
    /// the old file set until the swap is complete. On error the inputs are
    /// left untouched; the output only becomes visible after a successful
    /// write, so a failed run can simply be retried.
    pub fn compact(&self) -> Result<()> {
        let mut levels = self.levels.write();

        let l0_count = levels.get(&0).map_or(0, |l| l.len());
        if l0_count < self.l0_compaction_threshold {
            return Ok(());
        }
        info!("l0 compaction triggered: {} files", l0_count);

        // Inputs: all of L0, plus the L1 files whose range overlaps L0's
        // envelope.
        let mut inputs: Vec<(u32, u64, Arc<SstReader>)> = Vec::new();
        if let Some(l0) = levels.get(&0) {
            for (&id, reader) in l0 {
                inputs.push((0, id, Arc::clone(reader)));
            }
        }

        let min_key = inputs
            .iter()
            .filter_map(|(_, _, r)| r.first_key())
            .min()
            .map(str::to_string);
        let max_key = inputs
            .iter()
            .filter_map(|(_, _, r)| r.last_key())
            .max()
            .map(str::to_string);

        let (min_key, max_key) = match (min_key, max_key) {
            (Some(min), Some(max)) => (min, max),
            // Every L0 file is empty; drop them and stop.
            _ => {
                Self::remove_inputs(&mut levels, &inputs);
                return Ok(());
            }
        };

        if let Some(l1) = levels.get(&1) {
            for (&id, reader) in l1 {
                let overlaps = match (reader.first_key(), reader.last_key()) {
                    // Neither strictly left of the envelope nor strictly right.
                    (Some(first), Some(last)) => {
                        !(last < min_key.as_str() || first > max_key.as_str())
                    }
                    _ => false,
                };
                if overlaps {
                    inputs.push((1, id, Arc::clone(reader)));
                }
            }
        }

        let new_id = self.allocate_id();
        let output_name = sst_filename(1, new_id);
        let output_path = self.sst_dir().join(&output_name);

        let entries = merge_inputs(&inputs, &output_path)
            .with_context(|| format!("compaction into {} failed", output_name))?;

        if entries > 0 {
            let reader = SstReader::open(&output_path, Arc::clone(&self.cache))?;
            levels.entry(1).or_default().insert(new_id, Arc::new(reader));
        }

        Self::remove_inputs(&mut levels, &inputs);

        info!(
            "compaction done: {} inputs -> {}",
            inputs.len(),
            if entries > 0 {
                output_name
            } else {
                "(nothing: all entries were dead)".to_string()
            }
        );
        Ok(())
    }

    /// Unpublishes the input readers, drops their cached blocks, and
    /// deletes the physical files.
    fn remove_inputs(
        levels: &mut std::collections::BTreeMap<u32, crate::manager::Level>,
        inputs: &[(u32, u64, Arc<SstReader>)],
    ) {
        for (level, id, reader) in inputs {
            if let Some(level_files) = levels.get_mut(level) {
                level_files.remove(id);
            }
            reader.invalidate_cache();
            if let Err(e) = std::fs::remove_file(reader.path()) {
                error!("failed to delete compacted {}: {}", reader.path().display(), e);
            }
        }
        levels.retain(|_, files| !files.is_empty());
    }
}

/// Drains the input tables through a min-heap into a new L1 table.
///
/// Returns the number of live entries written; `0` means the output file
/// was already deleted by the stream writer.
fn merge_inputs(inputs: &[(u32, u64, Arc<SstReader>)], output_path: &std::path::Path) -> Result<u64> {
    let mut iterators: Vec<SstIterator> = Vec::with_capacity(inputs.len());
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();

    for (source, (_, id, reader)) in inputs.iter().enumerate() {
        let mut it = reader.iter()?;
        if let Some((key, value)) = it.next_entry()? {
            heap.push(HeapEntry {
                key,
                value,
                file_id: *id,
                source,
            });
        }
        iterators.push(it);
    }

    let mut writer = SstStreamWriter::create(output_path, COMPACTION_BLOOM_CAPACITY)?;
    let mut last_emitted: Option<String> = None;

    while let Some(entry) = heap.pop() {
        let newest_version = last_emitted.as_deref() != Some(entry.key.as_str());
        if newest_version {
            // Tombstones die here: this is the bottom level, so nothing
            // older remains to be shadowed.
            if entry.value != TOMBSTONE {
                writer.append(&entry.key, &entry.value)?;
            }
            last_emitted = Some(entry.key);
        }

        if let Some((key, value)) = iterators[entry.source].next_entry()? {
            heap.push(HeapEntry {
                key,
                value,
                file_id: entry.file_id,
                source: entry.source,
            });
        }
    }

    writer.finish()
}

/// The background compaction thread.
///
/// Sleeps for the configured interval between checks; each wake calls
/// [`SstManager::compact`] and swallows (logs) any error. Shutdown
/// interrupts the sleep, runs one final compaction, and joins.
pub struct Compactor {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    pub fn start(manager: Arc<SstManager>, interval: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("crest-compaction".to_string())
            .spawn(move || {
                let (stop_flag, cvar) = &*thread_shutdown;
                loop {
                    {
                        let mut stop = stop_flag.lock();
                        if !*stop {
                            let _ = cvar.wait_for(&mut stop, interval);
                        }
                        if *stop {
                            break;
                        }
                    }
                    if let Err(e) = manager.compact() {
                        error!("compaction failed: {:#}", e);
                    }
                }

                // One last pass so a shutdown right after heavy flushing
                // still leaves a tidy tree.
                if let Err(e) = manager.compact() {
                    error!("final compaction failed: {:#}", e);
                }
                info!("compaction thread exited");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signals the thread, waits for its final pass, and joins it.
    pub fn stop(&mut self) {
        let (stop_flag, cvar) = &*self.shutdown;
        *stop_flag.lock() = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}
