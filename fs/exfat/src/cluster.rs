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

//! The cluster-chain resolver (component G) and the block mapper built on
//! top of it (component H).

use exfat_ds::DataStorage;
use exfat_err::{CorruptionError, Error, Result};

use crate::{
    cache::CacheEntry,
    fat::{FatReader, FatValue, CLUSTER_EOF, FIRST_CLUSTER},
    inode::{DataFlag, Inode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedExtent {
    pub file_cluster: u32,
    pub disk_cluster: u32,
    pub run_len: u32,
}

impl ResolvedExtent {
    /// True once the walk has run off the end of the chain. `file_cluster` is
    /// then the chain's total length in clusters (its disk_cluster carries no
    /// meaning beyond the `CLUSTER_EOF` marker).
    pub fn is_eof(&self) -> bool {
        self.run_len == 0
    }
}

/// Translates `(inode, file_cluster, wanted_len)` into a contiguous run of
/// disk clusters. Once `file_cluster` is at or past the end of the chain,
/// returns a sentinel `ResolvedExtent` with `run_len == 0` and `file_cluster`
/// set to the chain's total length, so callers that walk all the way to EOF
/// (as mounting the root directory does, to learn its true size) can read
/// that count off the result instead of losing it.
pub fn get_cluster<DS: DataStorage>(
    inode: &Inode,
    data_storage: &DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    total_clusters: u32,
    file_cluster: u32,
    wanted_len: u32,
) -> Result<ResolvedExtent> {
    if inode.data_flag == DataFlag::Contiguous {
        return Ok(ResolvedExtent {
            file_cluster,
            disk_cluster: inode.start_cluster + file_cluster,
            run_len: wanted_len,
        });
    }

    let (hit, generation) = inode.extent_cache.lookup(file_cluster)?;
    let mut cid = hit.unwrap_or(CacheEntry {
        file_cluster: 0,
        disk_cluster: inode.start_cluster,
        length: 1,
    });

    let mut fat = FatReader::new(data_storage, fat_block_offset, bytes_per_block);

    loop {
        if cid.file_cluster <= file_cluster && cid.end_file_cluster() >= file_cluster + wanted_len
        {
            let offset = file_cluster - cid.file_cluster;
            inode.extent_cache.add(cid, generation)?;
            return Ok(ResolvedExtent {
                file_cluster,
                disk_cluster: cid.disk_cluster + offset,
                run_len: cid.length - offset,
            });
        }

        if cid.file_cluster as u64 + cid.length as u64 > total_clusters as u64 {
            return Err(Error::Corruption(CorruptionError::ClusterChain(
                cid.disk_cluster,
            )));
        }

        let tail_disk_cluster = cid.end_disk_cluster() - 1;
        match fat.read(tail_disk_cluster)? {
            FatValue::Eof => {
                // The chain ends inside (or right at the end of) `cid`. If
                // the target cluster is still in range, hand back whatever
                // of `cid` covers it (short of `wanted_len`, since there's
                // nothing past EOF to extend into) rather than discarding
                // that mapping for the EOF sentinel.
                if cid.file_cluster <= file_cluster && file_cluster < cid.end_file_cluster() {
                    let offset = file_cluster - cid.file_cluster;
                    let resolved = ResolvedExtent {
                        file_cluster,
                        disk_cluster: cid.disk_cluster + offset,
                        run_len: cid.length - offset,
                    };
                    inode.extent_cache.add(cid, generation)?;
                    return Ok(resolved);
                }

                let chain_len = cid.end_file_cluster();
                inode.extent_cache.add(cid, generation)?;
                return Ok(ResolvedExtent {
                    file_cluster: chain_len,
                    disk_cluster: CLUSTER_EOF,
                    run_len: 0,
                });
            }
            FatValue::Bad => {
                return Err(Error::Corruption(CorruptionError::BadCluster(
                    tail_disk_cluster,
                )));
            }
            FatValue::Free => {
                return Err(Error::Corruption(CorruptionError::ClusterChain(
                    tail_disk_cluster,
                )));
            }
            FatValue::Next(next) => {
                if next < FIRST_CLUSTER || next - FIRST_CLUSTER >= total_clusters {
                    return Err(Error::Corruption(CorruptionError::ClusterChain(next)));
                }
                if cid.end_disk_cluster() == next {
                    cid.length += 1;
                    continue;
                }

                // Fragmentation boundary. `cid` can't extend any further on
                // disk, so if the target cluster already falls inside it,
                // the answer is whatever `cid` covers (possibly short of
                // `wanted_len`) rather than the full run the caller asked
                // for. Record both the settled extent and the one-cluster
                // extent just discovered across the boundary before
                // returning, so a follow-up resolve past the boundary hits
                // the cache instead of re-walking the FAT.
                let boundary = CacheEntry { file_cluster: cid.end_file_cluster(), disk_cluster: next, length: 1 };
                if cid.file_cluster <= file_cluster && file_cluster < cid.end_file_cluster() {
                    let offset = file_cluster - cid.file_cluster;
                    let resolved = ResolvedExtent {
                        file_cluster,
                        disk_cluster: cid.disk_cluster + offset,
                        run_len: cid.length - offset,
                    };
                    inode.extent_cache.add(cid, generation)?;
                    inode.extent_cache.add(boundary, generation)?;
                    return Ok(resolved);
                }

                inode.extent_cache.add(cid, generation)?;
                cid = boundary;
            }
        }
    }
}

/// Walks a chain all the way to its EOF marker and returns its length in
/// clusters, regardless of what the inode's `size` field currently claims.
/// Used once at mount time to compute the root directory's true size, since
/// the root directory has no parent directory entry recording it.
pub fn chain_length<DS: DataStorage>(
    inode: &Inode,
    data_storage: &DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    total_clusters: u32,
) -> Result<u32> {
    let resolved = get_cluster(
        inode,
        data_storage,
        fat_block_offset,
        bytes_per_block,
        total_clusters,
        u32::MAX,
        0,
    )?;
    Ok(resolved.file_cluster)
}

fn cluster_to_block(cluster: u32, blocks_per_cluster: u32, cluster_heap_block_offset: u64) -> u64 {
    cluster_heap_block_offset + (cluster - FIRST_CLUSTER) as u64 * blocks_per_cluster as u64
}

/// Translates `(inode, file_block, max_blocks)` into a device block range.
/// Returns `Ok(None)` once `file_block` is at or past the inode's size.
#[allow(clippy::too_many_arguments)]
pub fn get_block<DS: DataStorage>(
    inode: &Inode,
    data_storage: &DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    blocks_per_cluster: u32,
    cluster_heap_block_offset: u64,
    total_clusters: u32,
    file_block: u64,
    max_blocks: u32,
) -> Result<Option<(u64, u32)>> {
    let last_block = inode.size.div_ceil(bytes_per_block as u64);
    if file_block >= last_block {
        return Ok(None);
    }

    let iclus = (file_block / blocks_per_cluster as u64) as u32;
    let off = (file_block % blocks_per_cluster as u64) as u32;
    let wanted_clusters =
        ((max_blocks as u64).div_ceil(blocks_per_cluster as u64) as u32).max(1);

    let resolved = get_cluster(
        inode,
        data_storage,
        fat_block_offset,
        bytes_per_block,
        total_clusters,
        iclus,
        wanted_clusters,
    )?;
    if resolved.is_eof() {
        return Ok(None);
    }

    let device_block =
        cluster_to_block(resolved.disk_cluster, blocks_per_cluster, cluster_heap_block_offset)
            + off as u64;
    let available_in_run = resolved.run_len * blocks_per_cluster - off;
    let remaining_in_file = (last_block - file_block) as u32;
    let mapped_blocks = available_in_run.min(remaining_in_file).min(max_blocks).max(1);

    Ok(Some((device_block, mapped_blocks)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inode::DirentLocation,
        test_support::MemoryStorage,
    };

    fn fragmented_inode() -> Inode {
        Inode::new(
            2,
            1,
            DirentLocation { block: 1, offset: 0 },
            5,
            DataFlag::FatChain,
            false,
            3 * 512, // 3 clusters of 512 bytes
            3 * 512,
            0,
            Default::default(),
            Default::default(),
        )
    }

    fn fat_storage() -> MemoryStorage {
        let storage = MemoryStorage::new(4096);
        // FAT[5] = 6, FAT[6] = 8, FAT[8] = EOF
        storage.write_u32(5 * 4, 6);
        storage.write_u32(6 * 4, 8);
        storage.write_u32(8 * 4, 0xFFFFFFFF);
        storage
    }

    #[test]
    fn resolves_and_caches_a_fragmented_chain() {
        let inode = fragmented_inode();
        let storage = fat_storage();

        let first = get_cluster(&inode, &storage, 0, 512, 64, 0, 3).unwrap();
        assert_eq!((first.file_cluster, first.disk_cluster, first.run_len), (0, 5, 2));

        let second = get_cluster(&inode, &storage, 0, 512, 64, 2, 1).unwrap();
        assert_eq!((second.file_cluster, second.disk_cluster, second.run_len), (2, 8, 1));

        assert_eq!(inode.extent_cache.len(), 2);
    }

    #[test]
    fn past_end_of_chain_returns_none() {
        let inode = fragmented_inode();
        let storage = fat_storage();
        get_cluster(&inode, &storage, 0, 512, 64, 0, 3).unwrap();
        assert!(get_cluster(&inode, &storage, 0, 512, 64, 3, 1)
            .unwrap()
            .is_eof());
    }

    #[test]
    fn wanted_len_past_chain_end_still_resolves_an_in_range_cluster() {
        let inode = fragmented_inode();
        let storage = fat_storage();

        // Asking for more clusters than the chain has left must not lose the
        // mapping for the cluster that is actually in range.
        let resolved = get_cluster(&inode, &storage, 0, 512, 64, 2, u32::MAX).unwrap();
        assert_eq!((resolved.file_cluster, resolved.disk_cluster, resolved.run_len), (2, 8, 1));
        assert!(!resolved.is_eof());
    }

    #[test]
    fn bad_cluster_marker_is_corruption() {
        let inode = fragmented_inode();
        let storage = MemoryStorage::new(4096);
        storage.write_u32(5 * 4, 0xFFFFFFF7);
        let err = get_cluster(&inode, &storage, 0, 512, 64, 1, 1).unwrap_err();
        assert!(matches!(err, Error::Corruption(CorruptionError::BadCluster(5))));
    }

    #[test]
    fn chain_length_walks_to_eof() {
        let inode = fragmented_inode();
        let storage = fat_storage();
        let len = chain_length(&inode, &storage, 0, 512, 64).unwrap();
        assert_eq!(len, 3);
    }

    /// Several threads resolve overlapping cluster ranges of the same inode
    /// while another thread repeatedly invalidates its extent cache. The
    /// cache must never hand back a stale entry as if it were current, and
    /// none of this may panic or deadlock.
    #[test]
    fn concurrent_resolves_survive_concurrent_invalidation() {
        let inode = fragmented_inode();
        let storage = fat_storage();

        std::thread::scope(|scope| {
            for file_cluster in 0..3u32 {
                let inode = &inode;
                let storage = &storage;
                scope.spawn(move || {
                    for _ in 0..200 {
                        let _ = get_cluster(inode, storage, 0, 512, 64, file_cluster, 1);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..200 {
                    inode.extent_cache.invalidate().unwrap();
                }
            });
        });

        // The chain is still well-formed after the dust settles.
        let resolved = get_cluster(&inode, &storage, 0, 512, 64, 0, 1).unwrap();
        assert_eq!(resolved.disk_cluster, 5);
    }
}
