//! # WAL — Write-Ahead Log
//!
//! Provides crash-safe durability for the CrestKV storage engine.
//!
//! Every mutation is serialized into a binary record and appended to the
//! active log **before** the corresponding in-memory update. On restart the
//! active log is replayed to reconstruct the memtable, guaranteeing that no
//! acknowledged write is lost. Deletions are logged as a put of the tombstone
//! sentinel, so `PUT` is the only record kind.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 BE][crc32: u32 BE][body ...]
//! ```
//!
//! Body: `[op=0: u8][key_len: u32][key][val_len: u32][value]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself. The CRC covers
//! the body.
//!
//! ## Rotation
//!
//! The engine rotates the log whenever it freezes a memtable: the current
//! `wal.log` is renamed to `wal.log.<epoch-millis>` and a fresh `wal.log`
//! is opened. Archived epochs describe memtables that are either frozen
//! (and will be flushed) or already on disk; only the active log is replayed
//! at startup.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{replay, WalManager};
//!
//! let wal = WalManager::open("data", true).unwrap();
//! wal.log_put("hello", "world").unwrap();
//! drop(wal);
//!
//! let summary = replay("data/wal.log", |k, v| println!("{} = {}", k, v)).unwrap();
//! assert_eq!(summary.records, 1);
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Name of the active log file within the data directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Record kind byte for a put. Deletions are puts of the tombstone value,
/// so no other kind exists; anything else on replay is corruption.
const OP_PUT: u8 = 0;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation, carried an unknown op code, or had
    /// an absurd length.
    #[error("corrupt wal record")]
    Corrupt,

    /// A record body was not valid UTF-8.
    #[error("wal record is not valid utf-8")]
    InvalidUtf8,
}

/// What a replay saw: how many records were applied and whether the log
/// ended mid-record (a crash during the final append).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaySummary {
    /// Number of complete records applied.
    pub records: u64,
    /// `true` if the log ended with a partial record. Everything before it
    /// was applied; the torn tail is discarded.
    pub truncated: bool,
}

struct WalFile {
    file: File,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

/// Serializes appends and rotations over the single active log file.
///
/// Appends are framed, CRC-checksummed, and written with a single
/// `write_all`; when `sync` is `true` every append is followed by
/// `sync_all()` (fsync) so the record is durable before the call returns.
pub struct WalManager {
    dir: PathBuf,
    path: PathBuf,
    sync: bool,
    inner: Mutex<WalFile>,
}

impl WalManager {
    /// Opens (or creates) the active log under `dir` in append mode.
    ///
    /// # Arguments
    ///
    /// * `dir` - data directory holding `wal.log` (must already exist).
    /// * `sync` - if true, every `log_put` call is followed by fsync.
    pub fn open<P: AsRef<Path>>(dir: P, sync: bool) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(WAL_FILE_NAME);
        let file = Self::open_log(&path)?;
        Ok(Self {
            dir,
            path,
            sync,
            inner: Mutex::new(WalFile {
                file,
                buf: Vec::with_capacity(256),
            }),
        })
    }

    fn open_log(path: &Path) -> Result<File, WalError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Path of the active log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably records a put of `key` -> `value`.
    ///
    /// Concurrent callers are ordered arbitrarily but each record is written
    /// atomically under the internal mutex. When the call returns, the
    /// record is on disk (given `sync`); the crash-loss window is only the
    /// records whose `log_put` had not yet returned.
    pub fn log_put(&self, key: &str, value: &str) -> Result<(), WalError> {
        let mut guard = self.inner.lock();
        let WalFile { file, buf } = &mut *guard;

        // Reuse the internal buffer -- clear but keep the allocation.
        buf.clear();

        // Reserve 8 bytes for the frame header (record_len + crc), filled later.
        buf.extend_from_slice(&[0u8; 8]);

        buf.write_u8(OP_PUT)?;
        buf.write_u32::<BigEndian>(key.len() as u32)?;
        buf.extend_from_slice(key.as_bytes());
        buf.write_u32::<BigEndian>(value.len() as u32)?;
        buf.extend_from_slice(value.as_bytes());

        let body = &buf[8..];

        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        // record_len = body + CRC, must fit in u32.
        let record_len = (body.len() as u64) + 4;
        if record_len > u32::MAX as u64 {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "wal record too large (exceeds u32::MAX bytes)",
            )));
        }

        buf[0..4].copy_from_slice(&(record_len as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&crc.to_be_bytes());

        // Single write call for the entire frame.
        file.write_all(buf)?;
        file.flush()?;

        if self.sync {
            file.sync_all()?;
        }

        Ok(())
    }

    /// Archives the active log and starts a fresh one.
    ///
    /// The current `wal.log` is renamed to `wal.log.<epoch-millis>`. The
    /// engine calls this under its memtable-switch write lock, so rotations
    /// never race with each other; the internal mutex keeps them ordered
    /// against concurrent appends.
    pub fn rotate(&self) -> Result<(), WalError> {
        let mut guard = self.inner.lock();
        guard.file.sync_all()?;

        if self.path.exists() {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            let archived = self.dir.join(format!("{}.{}", WAL_FILE_NAME, millis));
            std::fs::rename(&self.path, archived)?;
        }

        guard.file = Self::open_log(&self.path)?;
        Ok(())
    }

    /// Forces all buffered data to disk and closes nothing; the file handle
    /// stays usable. Called by the engine during shutdown.
    pub fn sync_to_disk(&self) -> Result<(), WalError> {
        let mut guard = self.inner.lock();
        guard.file.flush()?;
        guard.file.sync_all()?;
        Ok(())
    }
}

/// Replays every complete record in the log at `path`, calling `apply` for
/// each `(key, value)` pair in file order.
///
/// # Termination
///
/// - **Missing file** -> `Ok` with an empty summary (fresh start).
/// - **Clean EOF** -> `Ok`.
/// - **Truncated tail** (partial record at the end, e.g. crash mid-write) ->
///   `Ok` with `truncated = true` after applying all complete records.
/// - **CRC mismatch / unknown op / absurd length** -> `Err(WalError::Corrupt)`.
/// - **I/O error** -> `Err(WalError::Io(..))`.
pub fn replay<P, F>(path: P, mut apply: F) -> Result<ReplaySummary, WalError>
where
    P: AsRef<Path>,
    F: FnMut(String, String),
{
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReplaySummary::default()),
        Err(e) => return Err(WalError::Io(e)),
    };
    let mut rdr = BufReader::new(file);

    let mut summary = ReplaySummary::default();
    // Reusable buffer to avoid allocation per record.
    let mut body = Vec::with_capacity(256);

    loop {
        let record_len = match rdr.read_u32::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(summary),
            Err(e) => return Err(WalError::Io(e)),
        };

        // record_len includes the CRC (4 bytes) but not itself.
        // Reject absurd sizes -> corruption.
        const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;
        if record_len <= 4 || record_len > MAX_RECORD_SIZE {
            return Err(WalError::Corrupt);
        }

        let crc = match rdr.read_u32::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                summary.truncated = true;
                return Ok(summary);
            }
            Err(e) => return Err(WalError::Io(e)),
        };

        let body_len = (record_len - 4) as usize;
        body.clear();
        body.resize(body_len, 0);
        match rdr.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                summary.truncated = true;
                return Ok(summary);
            }
            Err(e) => return Err(WalError::Io(e)),
        }

        // Verify the CRC only after the full body was read.
        let mut hasher = Crc32::new();
        hasher.update(&body);
        if hasher.finalize() != crc {
            return Err(WalError::Corrupt);
        }

        let (key, value) = parse_body(&body)?;
        apply(key, value);
        summary.records += 1;
    }
}

fn parse_body(body: &[u8]) -> Result<(String, String), WalError> {
    let mut br = body;

    let op = br.read_u8()?;
    if op != OP_PUT {
        return Err(WalError::Corrupt);
    }

    let key_len = br.read_u32::<BigEndian>()? as usize;
    if key_len > br.len() {
        return Err(WalError::Corrupt);
    }
    let mut key = vec![0u8; key_len];
    br.read_exact(&mut key)?;

    let val_len = br.read_u32::<BigEndian>()? as usize;
    if val_len > br.len() {
        return Err(WalError::Corrupt);
    }
    let mut value = vec![0u8; val_len];
    br.read_exact(&mut value)?;

    let key = String::from_utf8(key).map_err(|_| WalError::InvalidUtf8)?;
    let value = String::from_utf8(value).map_err(|_| WalError::InvalidUtf8)?;
    Ok((key, value))
}

#[cfg(test)]
mod tests;
