//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the CrestKV storage engine.
//!
//! When the in-memory [`memtable::SkipList`] exceeds its size threshold the
//! engine flushes it to disk as an SSTable. SSTables are *write-once,
//! read-many* -- once created they are never modified, only replaced during
//! compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (sorted key/value records, ~4 KiB per block)       │
//! │                                                               │
//! │ key_len (u32) | key | value_len (u32) | value                  │
//! │                                                               │
//! │ ... repeated; a new block starts at each 4 KiB boundary ...    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (one entry per data block)                         │
//! │                                                               │
//! │ count (u32)                                                    │
//! │ last_key_len (u32) | last_key | offset (u64) | size (u32)      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM FILTER (serialized bloom::BloomFilter)                   │
//! │                                                               │
//! │ num_hashes (u32) | num_bits (u32) | bits_len (u32) | bits      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 24 bytes)                                  │
//! │                                                               │
//! │ index_offset (u64) | bloom_offset (u64) | magic (u64)          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. The magic value is `0x123456789ABCDEF0`.
//! Files shorter than the 24-byte footer are treated as empty.
//!
//! Point lookups go bloom filter -> index binary search -> single block
//! fetch (through the shared [`BlockCache`]) -> linear scan within the
//! block. Sequential scans for compaction use [`SstIterator`], which walks
//! the data section with its own file handle.

mod cache;
mod format;
mod iterator;
mod reader;
mod writer;

pub use cache::BlockCache;
pub use format::{IndexEntry, DATA_BLOCK_SIZE_TARGET, FOOTER_BYTES, SSTABLE_MAGIC};
pub use iterator::SstIterator;
pub use reader::SstReader;
pub use writer::{SstStreamWriter, SstWriter};

#[cfg(test)]
mod tests;
