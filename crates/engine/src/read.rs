//! Read path: active memtable, then frozen memtables newest-first, then
//! the SSTable levels. The first version found wins; a tombstone at any
//! stage means the key is deleted.

use anyhow::Result;
use memtable::TOMBSTONE;

use crate::LsmStore;

impl LsmStore {
    /// Looks up a key, returning `None` for missing and deleted keys.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let raw = self.lookup_raw(key)?;
        Ok(raw.filter(|value| value != TOMBSTONE))
    }

    /// Finds the newest stored version of `key`, tombstone included.
    fn lookup_raw(&self, key: &str) -> Result<Option<String>> {
        {
            let mem = self.active.read();
            if let Some(value) = mem.get(key) {
                return Ok(Some(value));
            }
        }

        {
            // Newest frozen memtable first: a key rewritten across two
            // rotations exists in both, and only the newer version counts.
            let immutables = self.immutables.read();
            for mem in immutables.iter().rev() {
                if let Some(value) = mem.get(key) {
                    return Ok(Some(value));
                }
            }
        }

        self.manager.get(key)
    }
}
