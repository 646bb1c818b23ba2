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

//! Free-space bitmap loader (component D): this reader never allocates, so
//! the only thing it needs from the bitmap is the free cluster count it
//! reports through `statfs`.

use exfat_ds::DataStorage;
use exfat_err::Result;

use crate::{cluster::get_block, inode::Inode};

/// Counts the set bits across the whole bitmap inode (bit *i* = cluster
/// *i+2* is in use) and returns the number of free clusters.
#[allow(clippy::too_many_arguments)]
pub fn count_free_clusters<DS: DataStorage>(
    inode: &Inode,
    data_storage: &DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    blocks_per_cluster: u32,
    cluster_heap_block_offset: u64,
    total_clusters: u32,
) -> Result<u32> {
    let mut used_bits: u64 = 0;
    let mut file_block = 0u64;

    loop {
        let mapped = get_block(
            inode,
            data_storage,
            fat_block_offset,
            bytes_per_block,
            blocks_per_cluster,
            cluster_heap_block_offset,
            total_clusters,
            file_block,
            u32::MAX / 2,
        )?;
        let Some((device_block, mapped_blocks)) = mapped else {
            break;
        };

        let mut buffer = vec![0u8; bytes_per_block as usize * mapped_blocks as usize];
        data_storage.read(device_block * bytes_per_block as u64, &mut buffer)?;
        used_bits += buffer.iter().map(|b| b.count_ones() as u64).sum::<u64>();

        file_block += mapped_blocks as u64;
    }

    Ok(total_clusters.saturating_sub(used_bits as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inode::{DataFlag, DirentLocation},
        test_support::MemoryStorage,
    };

    #[test]
    fn counts_set_bits_as_used_clusters() {
        let storage = MemoryStorage::new(4096);
        // FAT[5] = EOF, bitmap occupies exactly cluster 5.
        storage.write_u32(5 * 4, 0xFFFFFFFF);
        // Cluster heap starts at block 8; cluster 5 is the 4th cluster (index 3).
        let cluster_heap_block_offset = 8u64;
        let blocks_per_cluster = 1u32;
        let bytes_per_block = 512u32;
        let bitmap_block = cluster_heap_block_offset + (5 - 2) * blocks_per_cluster as u64;
        // 8 clusters total -> 1 byte of bitmap; mark clusters 2,3,4 in use (bits 0,1,2).
        storage.write_u8(bitmap_block * bytes_per_block as u64, 0b0000_0111);

        let inode = Inode::new(
            3,
            1,
            DirentLocation { block: 0, offset: 0 },
            5,
            DataFlag::FatChain,
            false,
            1,
            1,
            0,
            Default::default(),
            Default::default(),
        );

        let free = count_free_clusters(
            &inode,
            &storage,
            0,
            bytes_per_block,
            blocks_per_cluster,
            cluster_heap_block_offset,
            8,
        )
        .unwrap();
        assert_eq!(free, 5);
    }
}
