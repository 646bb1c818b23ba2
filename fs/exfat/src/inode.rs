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

use std::{
    collections::HashMap,
    sync::{atomic::{AtomicU64, Ordering}, Arc, RwLock},
};

use exfat_err::Result;
use exfat_vfs::Timestamp;

use crate::cache::{ExtentCache, DEFAULT_CAPACITY};

/// Whether an inode's allocation is a single run the FAT need not describe.
/// The root directory and most ordinary files are FAT-chained; only a
/// handful of system objects (and files written with the "contiguous"
/// allocation hint) bypass the FAT entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFlag {
    FatChain,
    Contiguous,
}

/// The location of an inode's primary directory entry: the block holding it
/// and the byte offset within that block. Stable for the inode's lifetime
/// since this reader never renames or moves files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirentLocation {
    pub block: u64,
    pub offset: u64,
}

pub struct Inode {
    pub ino: u64,
    /// Inode number of the directory this inode was discovered in. The root
    /// directory is its own parent, matching the original driver's
    /// `parent_ino` fallback. `readdir`'s synthesized `..` entry resolves
    /// through this field, since the `FileSystem` trait itself carries no
    /// parent parameter.
    pub parent_ino: u64,
    pub primary_dirent: DirentLocation,
    pub start_cluster: u32,
    pub data_flag: DataFlag,
    pub is_directory: bool,
    pub size: u64,
    pub physical_size: u64,
    pub attributes: u16,
    pub modified: Timestamp,
    pub accessed: Timestamp,
    pub extent_cache: ExtentCache,
}

impl Inode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ino: u64,
        parent_ino: u64,
        primary_dirent: DirentLocation,
        start_cluster: u32,
        data_flag: DataFlag,
        is_directory: bool,
        size: u64,
        physical_size: u64,
        attributes: u16,
        modified: Timestamp,
        accessed: Timestamp,
    ) -> Self {
        Self {
            ino,
            parent_ino,
            primary_dirent,
            start_cluster,
            data_flag,
            is_directory,
            size,
            physical_size,
            attributes,
            modified,
            accessed,
            extent_cache: ExtentCache::new(DEFAULT_CAPACITY),
        }
    }
}

/// Per-superblock table mapping a primary dirent location to the live inode
/// instantiated for it, so repeated lookups of the same file return the same
/// inode number and share one extent cache. Also indexed by inode number, so
/// that `stat`/`read`/`readdir` (which only ever see the number, not the
/// location) can recover the live inode.
pub struct InodeCache {
    by_location: RwLock<HashMap<DirentLocation, Arc<Inode>>>,
    by_ino: RwLock<HashMap<u64, Arc<Inode>>>,
    next_ino: AtomicU64,
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            by_location: RwLock::new(HashMap::new()),
            by_ino: RwLock::new(HashMap::new()),
            // Ino 1 is reserved for the root directory.
            next_ino: AtomicU64::new(2),
        }
    }

    pub fn get(&self, location: DirentLocation) -> Result<Option<Arc<Inode>>> {
        Ok(self.by_location.read()?.get(&location).cloned())
    }

    pub fn get_by_ino(&self, ino: u64) -> Result<Option<Arc<Inode>>> {
        Ok(self.by_ino.read()?.get(&ino).cloned())
    }

    /// Returns the cached inode at `location` if present, otherwise builds
    /// one with `build` and inserts it. `build` is only ever invoked while
    /// not holding the table lock.
    pub fn get_or_insert(
        &self,
        location: DirentLocation,
        build: impl FnOnce(u64) -> Result<Inode>,
    ) -> Result<Arc<Inode>> {
        if let Some(existing) = self.get(location)? {
            return Ok(existing);
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        let inode = Arc::new(build(ino)?);
        let mut guard = self.by_location.write()?;
        // Another thread may have raced us; keep whichever was inserted first.
        let inode = guard.entry(location).or_insert(inode).clone();
        self.by_ino.write()?.entry(inode.ino).or_insert(inode.clone());
        Ok(inode)
    }

    pub fn insert_root(&self, inode: Inode) -> Arc<Inode> {
        let inode = Arc::new(inode);
        self.by_location
            .write()
            .unwrap()
            .insert(inode.primary_dirent, inode.clone());
        self.by_ino.write().unwrap().insert(inode.ino, inode.clone());
        inode
    }
}

impl Default for InodeCache {
    fn default() -> Self {
        Self::new()
    }
}
