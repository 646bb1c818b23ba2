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

//! Mount / superblock validation (component K): validates the boot region,
//! verifies both boot-region checksums, and brings up the root inode, the
//! free-space bitmap, and the up-case table.

use std::sync::Arc;

use log::warn;

use exfat_ds::DataStorage;
use exfat_err::{CorruptionError, Error, Result};
use zerocopy::FromBytes;

use crate::{
    bitmap::count_free_clusters,
    boot_sector::{
        BootSector, BACKUP_BOOT_REGION_BLOCK, BOOT_REGION_BLOCKS, BOOT_SIGNATURE,
        CHECKSUM_SKIP_OFFSETS, FILE_SYSTEM_NAME,
    },
    checksum::{sum32, sum32_skip},
    cluster::{chain_length, get_block},
    dirent::{walk_directory, RootdirScan},
    inode::{DataFlag, DirentLocation, Inode, InodeCache},
    options::ExfatMountOptions,
    upcase::UpcaseTable,
};

/// Bit 1 of the boot sector's `volume_flags`: the volume was not unmounted
/// cleanly last time it was writable.
const VOLUME_DIRTY: u16 = 0x0002;

/// A sentinel inode location used for the two system pseudo-files (the
/// bitmap and the up-case table) and the root directory, none of which have
/// a real primary dirent of their own.
fn synthetic_location(tag: u64) -> DirentLocation {
    DirentLocation { block: u64::MAX - tag, offset: 0 }
}

/// Everything learned from a successful mount: derived geometry, the root
/// inode, the per-mount inode cache, and the decoded up-case table.
pub struct ExfatVolume {
    pub fat_block_offset: u64,
    pub bytes_per_block: u32,
    pub blocks_per_cluster: u32,
    pub cluster_heap_block_offset: u64,
    pub total_clusters: u32,
    pub free_clusters: u32,
    pub serial_number: u32,
    pub root: Arc<Inode>,
    pub inodes: InodeCache,
    pub upcase: UpcaseTable,
    pub options: ExfatMountOptions,
}

/// Reads `len` bytes from the start of `inode`'s data, one block run at a
/// time. Used for the small system files (bitmap, up-case table) that this
/// core reads in full rather than by byte-range.
fn read_inode_prefix<DS: DataStorage>(
    inode: &Inode,
    data_storage: &DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    blocks_per_cluster: u32,
    cluster_heap_block_offset: u64,
    total_clusters: u32,
    len: u64,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len as usize);
    let mut file_block = 0u64;
    while (out.len() as u64) < len {
        let Some((device_block, mapped_blocks)) = get_block(
            inode,
            data_storage,
            fat_block_offset,
            bytes_per_block,
            blocks_per_cluster,
            cluster_heap_block_offset,
            total_clusters,
            file_block,
            u32::MAX / 2,
        )?
        else {
            break;
        };
        let mut buffer = vec![0u8; bytes_per_block as usize * mapped_blocks as usize];
        data_storage.read(device_block * bytes_per_block as u64, &mut buffer)?;
        out.extend_from_slice(&buffer);
        file_block += mapped_blocks as u64;
    }
    out.truncate(len as usize);
    Ok(out)
}

fn boot_sector_error(message: impl Into<String>) -> Error {
    Error::Corruption(CorruptionError::BootSector(message.into()))
}

fn validate_boot_sector(boot: &BootSector) -> Result<()> {
    if boot.boot_signature != BOOT_SIGNATURE {
        return Err(boot_sector_error("bad boot signature"));
    }
    if boot.file_system_name != FILE_SYSTEM_NAME {
        return Err(boot_sector_error("not an exFAT volume"));
    }
    if boot.must_be_zero.iter().any(|&b| b != 0) {
        return Err(boot_sector_error("reserved region is not zero-filled"));
    }
    if !(9..=12).contains(&boot.bytes_per_sector_shift) {
        return Err(boot_sector_error("bytes-per-sector shift out of range"));
    }
    if boot.bytes_per_cluster_shift() > 25 {
        return Err(boot_sector_error("cluster size exceeds 32 MiB"));
    }
    if boot.volume_length.get() == 0 {
        return Err(boot_sector_error("volume length is zero"));
    }
    if (boot.fat_offset.get() as u64) < BACKUP_BOOT_REGION_BLOCK * 2 {
        return Err(boot_sector_error("FAT overlaps the boot region"));
    }
    if boot.fat_length.get() == 0 {
        return Err(boot_sector_error("FAT length is zero"));
    }
    if (boot.cluster_heap_offset.get() as u64) < BACKUP_BOOT_REGION_BLOCK * 2 {
        return Err(boot_sector_error("cluster heap overlaps the boot region"));
    }
    if boot.cluster_count.get() == 0 {
        return Err(boot_sector_error("cluster count is zero"));
    }
    let occupied = (boot.cluster_count.get() as u64) << boot.sectors_per_cluster_shift;
    if occupied > boot.volume_length.get() {
        return Err(boot_sector_error("cluster heap extends past the volume"));
    }
    if boot.first_cluster_of_root_directory.get() < 2 {
        return Err(boot_sector_error("root directory cluster is out of range"));
    }
    Ok(())
}

/// Verifies one boot region's checksum (the main region at block 0, or the
/// backup region at block [`BACKUP_BOOT_REGION_BLOCK`]), per
/// `exfat_exsb_verify_checksum`.
fn verify_boot_region_checksum<DS: DataStorage>(
    data_storage: &DS,
    region_start: u64,
    bytes_per_block: u32,
) -> Result<()> {
    let mut block0 = vec![0u8; bytes_per_block as usize];
    data_storage.read(region_start * bytes_per_block as u64, &mut block0)?;
    let mut sum = sum32_skip(0, &block0, &CHECKSUM_SKIP_OFFSETS);

    for i in 1..BOOT_REGION_BLOCKS - 1 {
        let mut block = vec![0u8; bytes_per_block as usize];
        data_storage.read((region_start + i) * bytes_per_block as u64, &mut block)?;
        sum = sum32(sum, &block);
    }

    let checksum_block_index = region_start + BOOT_REGION_BLOCKS - 1;
    let mut checksum_block = vec![0u8; bytes_per_block as usize];
    data_storage.read(checksum_block_index * bytes_per_block as u64, &mut checksum_block)?;
    let mismatched = checksum_block
        .chunks_exact(4)
        .any(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]) != sum);
    if mismatched {
        return Err(Error::Corruption(CorruptionError::BootChecksum { block: region_start }));
    }
    Ok(())
}

/// Validates the boot region and brings up the root inode, bitmap, and
/// up-case table, per §4.K.
pub fn mount<DS: DataStorage>(data_storage: &DS, options: ExfatMountOptions) -> Result<ExfatVolume> {
    // Step 1-2: read and validate the boot sector at the minimum block size.
    let mut raw = vec![0u8; std::mem::size_of::<BootSector>()];
    data_storage.read(0, &mut raw)?;
    let boot = BootSector::ref_from_bytes(&raw).map_err(|_| boot_sector_error("short read"))?;
    validate_boot_sector(boot)?;

    let bytes_per_block = boot.bytes_per_sector() as u32;
    let blocks_per_cluster = 1u32 << boot.sectors_per_cluster_shift;
    let fat_block_offset = boot.fat_offset.get() as u64;
    let cluster_heap_block_offset = boot.cluster_heap_offset.get() as u64;
    let total_clusters = boot.cluster_count.get();
    let root_start_cluster = boot.first_cluster_of_root_directory.get();
    let serial_number = boot.volume_serial_number.get();
    let volume_flags = boot.volume_flags.get();

    // Step 3: the block-access trait is already byte-addressed, so there is
    // no device resectoring step to perform; bytes_per_block above is used
    // for every subsequent read.

    // Step 4: both boot regions must check out.
    verify_boot_region_checksum(data_storage, 0, bytes_per_block)?;
    verify_boot_region_checksum(data_storage, BACKUP_BOOT_REGION_BLOCK, bytes_per_block)?;

    // Step 5: build the root inode, then walk its chain once to learn its
    // true size (the root directory has no parent dirent to read a size
    // from).
    let root_stub = Inode::new(
        1,
        1,
        synthetic_location(0),
        root_start_cluster,
        DataFlag::FatChain,
        true,
        0,
        0,
        0x10,
        Default::default(),
        Default::default(),
    );
    let root_clusters = chain_length(&root_stub, data_storage, fat_block_offset, bytes_per_block, total_clusters)?;
    let root_size = root_clusters as u64 * boot.bytes_per_cluster();
    // The root directory is its own parent, matching the original driver's
    // parent_ino fallback.
    let root = Inode::new(
        1,
        1,
        synthetic_location(0),
        root_start_cluster,
        DataFlag::FatChain,
        true,
        root_size,
        root_size,
        0x10,
        Default::default(),
        Default::default(),
    );

    let inodes = InodeCache::new();
    let root = inodes.insert_root(root);

    // Step 6: locate the bitmap and up-case system dirents.
    let mut scan = RootdirScan::default();
    walk_directory(
        &root,
        data_storage,
        fat_block_offset,
        bytes_per_block,
        blocks_per_cluster,
        cluster_heap_block_offset,
        total_clusters,
        &mut scan,
    )?;

    // Step 7: the free-space bitmap.
    if scan.bitmap_cluster == 0 {
        return Err(boot_sector_error("couldn't find the free space bitmap"));
    }
    // One bit per cluster; a bitmap shorter than that can't possibly cover
    // every cluster, per `exfat_setup_bitmap`'s own size check.
    if scan.bitmap_size < (total_clusters as u64).div_ceil(8) {
        return Err(boot_sector_error("free space bitmap is too small"));
    }
    let bitmap_inode = Inode::new(
        0,
        1,
        synthetic_location(1),
        scan.bitmap_cluster,
        DataFlag::FatChain,
        false,
        scan.bitmap_size,
        scan.bitmap_size,
        0,
        Default::default(),
        Default::default(),
    );
    let free_clusters = count_free_clusters(
        &bitmap_inode,
        data_storage,
        fat_block_offset,
        bytes_per_block,
        blocks_per_cluster,
        cluster_heap_block_offset,
        total_clusters,
    )?;

    // Step 8: the up-case table. A missing or malformed table downgrades to
    // an identity mapping rather than aborting the mount (§4.E).
    let upcase = if scan.upcase_cluster == 0 {
        warn!("couldn't find the up-case table; names will be matched without case folding");
        UpcaseTable::identity()
    } else {
        let upcase_inode = Inode::new(
            0,
            1,
            synthetic_location(2),
            scan.upcase_cluster,
            DataFlag::FatChain,
            false,
            scan.upcase_size,
            scan.upcase_size,
            0,
            Default::default(),
            Default::default(),
        );
        let raw_table = read_inode_prefix(
            &upcase_inode,
            data_storage,
            fat_block_offset,
            bytes_per_block,
            blocks_per_cluster,
            cluster_heap_block_offset,
            total_clusters,
            scan.upcase_size,
        )?;
        UpcaseTable::decode(&raw_table, scan.upcase_checksum)
    };

    // Step 10: a dirty volume is mounted read-only with a warning, not
    // refused outright.
    if volume_flags & VOLUME_DIRTY != 0 {
        warn!("volume was not cleanly unmounted; mounting read-only");
    }

    Ok(ExfatVolume {
        fat_block_offset,
        bytes_per_block,
        blocks_per_cluster,
        cluster_heap_block_offset,
        total_clusters,
        free_clusters,
        serial_number,
        root,
        inodes,
        upcase,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStorage;

    /// A boot sector with a plausible geometry but no valid checksum;
    /// enough to exercise the field-validation step on its own.
    fn write_boot_sector_only() -> MemoryStorage {
        let bytes_per_block = 512u64;
        let storage = MemoryStorage::new((BACKUP_BOOT_REGION_BLOCK * 2 * bytes_per_block) as usize);

        storage.write_bytes(3, &FILE_SYSTEM_NAME);
        storage.write_u64(72, 1 << 20);
        storage.write_u32(80, 24);
        storage.write_u32(84, 1);
        storage.write_u32(88, 25);
        storage.write_u32(92, 64);
        storage.write_u32(96, 2);
        storage.write_u8(108, 9);
        storage.write_u8(109, 3);
        storage.write_u8(110, 1);
        storage.write_bytes(510, &BOOT_SIGNATURE);

        storage
    }

    #[test]
    fn rejects_a_bad_signature() {
        let storage = write_boot_sector_only();
        storage.write_u8(510, 0x00);
        let err = mount(&storage, ExfatMountOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corruption(CorruptionError::BootSector(_))));
    }

    #[test]
    fn rejects_a_root_directory_cluster_below_two() {
        let storage = write_boot_sector_only();
        storage.write_u32(96, 1);
        let err = mount(&storage, ExfatMountOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corruption(CorruptionError::BootSector(_))));
    }
}
