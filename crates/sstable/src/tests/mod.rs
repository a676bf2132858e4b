
use crate::BlockCache;
use memtable::SkipList;
use std::sync::Arc;

pub fn test_cache() -> Arc<BlockCache> {
    Arc::new(BlockCache::new(1024))
}

pub fn sample_memtable() -> SkipList {
    let mem = SkipList::new();
    mem.insert("apple", "red");
    mem.insert("banana", "yellow");
    mem.insert("cherry", "dark-red");
    mem.insert("date", "brown");
    mem
}

/// A memtable big enough to span several 4 KiB data blocks.
pub fn multi_block_memtable() -> SkipList {
    let mem = SkipList::new();
    for i in 0..200 {
        mem.insert(&format!("key_{:04}", i), &"x".repeat(100));
    }
    mem
}
