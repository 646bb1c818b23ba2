// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-inode LRU cache of resolved extents (contiguous file-cluster →
//! disk-cluster runs), guarded by a single lock standing in for the
//! kernel's per-inode spinlock. A generation id lets a resolver that raced
//! an invalidation discover its result is stale without holding the lock
//! across the FAT walk.

use std::sync::Mutex;

use exfat_err::Result;

/// Sentinel generation id; a cache id equal to this is treated as "no
/// generation was captured" and is never itself assigned as a live
/// generation.
pub const VALID: u64 = 0;

/// The default number of extents retained per inode.
pub const DEFAULT_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub file_cluster: u32,
    pub disk_cluster: u32,
    pub length: u32,
}

impl CacheEntry {
    pub fn end_file_cluster(&self) -> u32 {
        self.file_cluster + self.length
    }

    pub fn end_disk_cluster(&self) -> u32 {
        self.disk_cluster + self.length
    }
}

struct Inner {
    /// Most-recently-used entry first.
    entries: Vec<CacheEntry>,
    capacity: usize,
    valid_id: u64,
}

pub struct ExtentCache {
    inner: Mutex<Inner>,
}

impl ExtentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::with_capacity(capacity),
                capacity,
                // Never VALID: an `add` stamped with the sentinel bypasses
                // the staleness check entirely, so the live generation must
                // start one past it rather than at it.
                valid_id: VALID + 1,
            }),
        }
    }

    /// Returns the entry maximising `file_cluster` subject to
    /// `file_cluster <= wanted`, along with the generation id it was
    /// observed under. The hit is promoted to the front of the LRU.
    pub fn lookup(&self, wanted: u32) -> Result<(Option<CacheEntry>, u64)> {
        let mut inner = self.inner.lock()?;
        let valid_id = inner.valid_id;

        let best = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.file_cluster <= wanted)
            .max_by_key(|(_, e)| e.file_cluster)
            .map(|(i, _)| i);

        let entry = best.map(|i| {
            let e = inner.entries.remove(i);
            inner.entries.insert(0, e);
            e
        });

        Ok((entry, valid_id))
    }

    /// Inserts or merges `new`, captured under generation `id`.
    ///
    /// Ignored when: `id` is stale (neither the sentinel nor the current
    /// generation), or `new` is the trivially-recomputable
    /// `{file_cluster: 0, length < 2}` seed.
    pub fn add(&self, new: CacheEntry, id: u64) -> Result<()> {
        let mut inner = self.inner.lock()?;

        if id != VALID && id != inner.valid_id {
            return Ok(());
        }
        if new.file_cluster == 0 && new.length < 2 {
            return Ok(());
        }

        if let Some(existing) = inner
            .entries
            .iter_mut()
            .find(|e| e.file_cluster == new.file_cluster)
        {
            if existing.disk_cluster == new.disk_cluster {
                existing.length = existing.length.max(new.length);
                return Ok(());
            }
        }

        if inner.entries.len() >= inner.capacity {
            inner.entries.pop();
        }
        inner.entries.insert(0, new);
        Ok(())
    }

    /// Drops all entries and advances the generation id, skipping the
    /// sentinel. Any `add` carrying a generation captured before this call
    /// becomes a silent no-op.
    pub fn invalidate(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.entries.clear();
        inner.valid_id = inner.valid_id.wrapping_add(1);
        if inner.valid_id == VALID {
            inner.valid_id = inner.valid_id.wrapping_add(1);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
