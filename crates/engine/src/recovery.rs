//! Cold-start recovery: replaying the active WAL epoch into a fresh
//! memtable.
//!
//! Only `wal.log` is replayed. Archived epochs (`wal.log.<millis>`)
//! describe memtables that were frozen before the last shutdown; whatever
//! survived of them is already in an SSTable, and the active epoch holds
//! everything newer.

use anyhow::{Context, Result};
use memtable::SkipList;
use std::path::Path;
use tracing::{info, warn};

/// Replays the WAL at `path` into `mem`, applying records in file order.
///
/// A torn final record (crash mid-append) is not an error: every complete
/// record before it is applied and a warning is logged. A mid-stream CRC
/// mismatch still fails, since it means damage rather than a clean crash.
pub(crate) fn replay_wal(path: &Path, mem: &SkipList) -> Result<u64> {
    let summary = wal::replay(path, |key, value| {
        mem.insert(&key, &value);
    })
    .with_context(|| format!("wal replay failed: {}", path.display()))?;

    if summary.truncated {
        warn!(
            "wal {} ended mid-record; recovered the {} records before the torn tail",
            path.display(),
            summary.records
        );
    } else if summary.records > 0 {
        info!("recovered {} records from {}", summary.records, path.display());
    }

    Ok(summary.records)
}
