//! # Memtable — Concurrent Skip List
//!
//! The in-memory sorted map absorbing recent writes, backed by a skip list.
//!
//! A skip list keeps its entries in a linked chain at level 0 and a tower of
//! progressively sparser chains above it; every level-`i` chain is a
//! subsequence of level `i-1`. Node heights are drawn from a geometric
//! distribution at insert time and never change, which gives expected
//! `O(log n)` descent for lookups and inserts without rebalancing.
//!
//! ## Concurrency
//!
//! One read-write lock guards the whole list: lookups and traversals take it
//! shared, `insert` and `remove` take it exclusive, each for the duration of
//! the entire operation. Node and byte counters are atomics readable without
//! the lock, so the engine can poll `approximate_size` cheaply on the write
//! path.
//!
//! ## Deletions in the LSM store
//!
//! The store never calls [`SkipList::remove`]; it records deletions by
//! inserting the [`TOMBSTONE`] sentinel so the version appears in flush and
//! compaction streams. `remove` exists for the plain ordered-map surface and
//! physically unsplices the node.

use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Reserved sentinel value marking a deleted key.
///
/// Must never collide with a user value; the engine stores it in place of a
/// value so deletions flow through flush and compaction in version order.
pub const TOMBSTONE: &str = "!!__TOMBSTONE__!!";

/// Maximum node height. A tower this tall indexes ~2^32 entries, far beyond
/// what a single memtable holds before rotation.
pub const MAX_LEVEL: usize = 32;

/// A node owns its entry and a forward pointer per occupied level.
///
/// Pointers are arena indices; `forwards.len() == height + 1`. The height is
/// fixed at allocation and the pointers are only mutated under the list's
/// write lock.
struct Node {
    key: String,
    value: String,
    forwards: Vec<Option<usize>>,
}

/// Everything the lock protects: the node arena, the head tower, the current
/// list level, and the free slots left behind by `remove`.
struct Inner {
    nodes: Vec<Node>,
    head: Vec<Option<usize>>,
    level: usize,
    free: Vec<usize>,
}

impl Inner {
    /// Forward pointer at `level` of `pred`, where `None` means the head.
    fn next_of(&self, pred: Option<usize>, level: usize) -> Option<usize> {
        match pred {
            None => self.head[level],
            Some(idx) => self.nodes[idx].forwards[level],
        }
    }

    fn set_next(&mut self, pred: Option<usize>, level: usize, next: Option<usize>) {
        match pred {
            None => self.head[level] = next,
            Some(idx) => self.nodes[idx].forwards[level] = next,
        }
    }

    /// Descends from the current top level to level 0, recording the
    /// predecessor of `key` at every level.
    fn find_predecessors(&self, key: &str) -> Vec<Option<usize>> {
        let mut update: Vec<Option<usize>> = vec![None; MAX_LEVEL + 1];
        let mut current: Option<usize> = None;

        for lvl in (0..=self.level).rev() {
            while let Some(next) = self.next_of(current, lvl) {
                if self.nodes[next].key.as_str() < key {
                    current = Some(next);
                } else {
                    break;
                }
            }
            update[lvl] = current;
        }
        update
    }
}

/// A concurrent ordered map from string keys to string values.
pub struct SkipList {
    inner: RwLock<Inner>,
    node_count: AtomicU64,
    approx_size: AtomicUsize,
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes: Vec::new(),
                head: vec![None; MAX_LEVEL + 1],
                level: 0,
                free: Vec::new(),
            }),
            node_count: AtomicU64::new(0),
            approx_size: AtomicUsize::new(0),
        }
    }

    /// Inserts a key-value pair, overwriting the value if the key exists.
    pub fn insert(&self, key: &str, value: &str) {
        let mut inner = self.inner.write();
        let update = inner.find_predecessors(key);

        // Existing key: overwrite in place and adjust the byte count by the
        // value-length delta.
        if let Some(idx) = inner.next_of(update[0], 0) {
            if inner.nodes[idx].key == key {
                let old_len = inner.nodes[idx].value.len();
                inner.nodes[idx].value = value.to_string();
                if value.len() >= old_len {
                    self.approx_size.fetch_add(value.len() - old_len, Ordering::Relaxed);
                } else {
                    self.approx_size.fetch_sub(old_len - value.len(), Ordering::Relaxed);
                }
                return;
            }
        }

        let height = random_height();
        let mut update = update;
        if height > inner.level {
            for slot in update.iter_mut().take(height + 1).skip(inner.level + 1) {
                *slot = None;
            }
            inner.level = height;
        }

        let mut node = Node {
            key: key.to_string(),
            value: value.to_string(),
            forwards: vec![None; height + 1],
        };
        for (lvl, fwd) in node.forwards.iter_mut().enumerate() {
            *fwd = inner.next_of(update[lvl], lvl);
        }

        let idx = match inner.free.pop() {
            Some(slot) => {
                inner.nodes[slot] = node;
                slot
            }
            None => {
                inner.nodes.push(node);
                inner.nodes.len() - 1
            }
        };
        for lvl in 0..=height {
            inner.set_next(update[lvl], lvl, Some(idx));
        }

        self.node_count.fetch_add(1, Ordering::Relaxed);
        self.approx_size
            .fetch_add(key.len() + value.len(), Ordering::Relaxed);
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read();
        let mut current: Option<usize> = None;

        for lvl in (0..=inner.level).rev() {
            while let Some(next) = inner.next_of(current, lvl) {
                if inner.nodes[next].key.as_str() < key {
                    current = Some(next);
                } else {
                    break;
                }
            }
        }

        match inner.next_of(current, 0) {
            Some(idx) if inner.nodes[idx].key == key => Some(inner.nodes[idx].value.clone()),
            _ => None,
        }
    }

    /// Returns `true` if `key` is present.
    pub fn search(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Physically removes `key`, unsplicing its node at every level.
    ///
    /// Returns `true` if the key existed. The list level falls while the top
    /// chain is left empty.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        let update = inner.find_predecessors(key);

        let idx = match inner.next_of(update[0], 0) {
            Some(idx) if inner.nodes[idx].key == key => idx,
            _ => return false,
        };

        let height = inner.nodes[idx].forwards.len() - 1;
        for lvl in 0..=height {
            let next = inner.nodes[idx].forwards[lvl];
            inner.set_next(update[lvl], lvl, next);
        }
        while inner.level > 0 && inner.head[inner.level].is_none() {
            inner.level -= 1;
        }

        let freed = key.len() + inner.nodes[idx].value.len();
        inner.nodes[idx] = Node {
            key: String::new(),
            value: String::new(),
            forwards: Vec::new(),
        };
        inner.free.push(idx);

        self.node_count.fetch_sub(1, Ordering::Relaxed);
        self.approx_size.fetch_sub(freed, Ordering::Relaxed);
        true
    }

    /// Visits every entry in ascending key order.
    ///
    /// Holds the read lock for the whole traversal; callers stream entries
    /// without materializing the list (the SSTable writer relies on this).
    pub fn for_each<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&str, &str) -> Result<(), E>,
    {
        let inner = self.inner.read();
        let mut current = inner.head[0];
        while let Some(idx) = current {
            let node = &inner.nodes[idx];
            f(&node.key, &node.value)?;
            current = node.forwards[0];
        }
        Ok(())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.node_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory running sum of `|key| + |value|` bytes stored.
    ///
    /// Used by the engine to decide when to rotate the memtable; it is not
    /// an exact heap measurement.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.approx_size.load(Ordering::Relaxed)
    }

    /// Current top level of the tower (highest level with any node).
    #[must_use]
    pub fn level(&self) -> usize {
        self.inner.read().level
    }

    /// Collects the chain at `level` in order. Test support: the chain at
    /// every level must be a subsequence of the chain below it.
    #[cfg(test)]
    fn keys_at_level(&self, level: usize) -> Vec<String> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        let mut current = inner.head[level];
        while let Some(idx) = current {
            out.push(inner.nodes[idx].key.clone());
            current = inner.nodes[idx].forwards[level];
        }
        out
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SkipList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipList")
            .field("len", &self.len())
            .field("approximate_size", &self.approximate_size())
            .field("level", &self.level())
            .finish()
    }
}

/// Node height: `1 + geometric(p = 1/2)`, capped at [`MAX_LEVEL`].
///
/// `thread_rng` keeps randomness per-thread so concurrent inserters do not
/// contend on a shared generator.
fn random_height() -> usize {
    let mut rng = rand::thread_rng();
    let mut height = 1;
    while height < MAX_LEVEL && rng.gen::<bool>() {
        height += 1;
    }
    height
}

#[cfg(test)]
mod tests;
