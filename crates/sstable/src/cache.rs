//! Shared LRU cache for decoded data-block bytes.
//!
//! One instance is shared by every SSTable reader in the process, keyed by
//! `"<file path>:<block offset>"`. Filenames are never reused (SSTable ids
//! are monotonic), so a key uniquely identifies a block for the lifetime of
//! the process.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bounded LRU mapping cache keys to block bytes.
///
/// Bounded by entry count rather than bytes: blocks are near-uniform in
/// size (~4 KiB), so a count bound is an effective byte bound.
pub struct BlockCache {
    entries: RwLock<CacheInner>,
    capacity: usize,
    /// Per-key in-flight guards so concurrent misses for the same block run
    /// the loader once.
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner {
    map: HashMap<String, Bytes>,
    order: VecDeque<String>,
}

impl BlockCache {
    /// Creates a cache holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            flights: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up cached block bytes. Promotes the entry to MRU on hit.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.entries.write();
        if let Some(data) = inner.map.get(key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            promote(&mut inner.order, key);
            Some(data)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts block bytes, evicting LRU entries past capacity.
    pub fn insert(&self, key: &str, data: Bytes) {
        let mut inner = self.entries.write();

        if inner.map.contains_key(key) {
            promote(&mut inner.order, key);
        } else {
            inner.order.push_front(key.to_owned());
        }
        inner.map.insert(key.to_owned(), data);

        while inner.map.len() > self.capacity {
            if let Some(victim) = inner.order.pop_back() {
                inner.map.remove(&victim);
            } else {
                break;
            }
        }
    }

    /// Returns the cached bytes for `key`, invoking `load` on a miss.
    ///
    /// Concurrent misses for the same key coalesce behind a per-key guard:
    /// one caller runs the loader, the rest wait and then hit the cache.
    /// Misses for *different* keys load in parallel.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> io::Result<Bytes>
    where
        F: FnOnce() -> io::Result<Vec<u8>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let gate = {
            let mut flights = self.flights.lock();
            flights
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock();

        // Whoever held the gate before us may have populated the entry.
        if let Some(hit) = self.get(key) {
            self.flights.lock().remove(key);
            return Ok(hit);
        }

        let result = load();
        let outcome = match result {
            Ok(bytes) => {
                let data = Bytes::from(bytes);
                self.insert(key, data.clone());
                Ok(data)
            }
            Err(e) => Err(e),
        };
        self.flights.lock().remove(key);
        outcome
    }

    /// Removes one entry, if present. Called by readers before their file
    /// is deleted.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.entries.write();
        if inner.map.remove(key).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
        }
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Moves an existing key to the front (MRU position) of the LRU deque.
fn promote(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
    order.push_front(key.to_owned());
}
