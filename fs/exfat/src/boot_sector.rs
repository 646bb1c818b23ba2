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

use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

/// The number of blocks a boot region (Main or Backup) spans: 12 data blocks
/// followed by one checksum block.
pub const BOOT_REGION_BLOCKS: u64 = 12;

/// The volume-relative block number of the first block of the Backup Boot
/// region.
pub const BACKUP_BOOT_REGION_BLOCK: u64 = 12;

/// Byte offsets, within block 0, of the fields excluded from the boot region
/// checksum (VolumeFlags and PercentInUse).
pub const CHECKSUM_SKIP_OFFSETS: [(usize, usize); 2] = [(106, 108), (112, 113)];

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const FILE_SYSTEM_NAME: [u8; 8] = *b"EXFAT   ";

/// The first 512 bytes of block 0 (and of block 12, its backup copy).
///
/// Doc comments below are intentionally verbose for this struct only: it is
/// the one piece of on-disk layout every mount depends on, and the valid
/// ranges matter for every bound check in [`crate::mount`].
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BootSector {
    /// The JumpBoot field shall contain the jump instruction for CPUs common
    /// in personal computers, which, when executed, "jumps" the CPU to
    /// execute the boot-strapping instructions in the BootCode field.
    pub jump_boot: [u8; 3],
    /// The FileSystemName field shall contain the name of the file system on
    /// the volume: the ASCII string "EXFAT   " (three trailing spaces).
    pub file_system_name: [u8; 8],
    /// Must be zero across the range the packed BIOS parameter block would
    /// occupy on FAT12/16/32 volumes, so that those implementations don't
    /// mistakenly mount an exFAT volume.
    pub must_be_zero: [u8; 53],
    /// Media-relative sector offset of the partition hosting this volume.
    pub partition_offset: U64,
    /// Size of the volume, in sectors.
    pub volume_length: U64,
    /// Volume-relative sector offset of the First FAT.
    ///
    /// Valid range: at least 24 (past the boot regions), at most
    /// `cluster_heap_offset - fat_length * number_of_fats`.
    pub fat_offset: U32,
    /// Length, in sectors, of each FAT (the volume may contain up to two).
    pub fat_length: U32,
    /// Volume-relative sector offset of the Cluster Heap.
    ///
    /// Valid range: at least `fat_offset + fat_length * number_of_fats`.
    pub cluster_heap_offset: U32,
    /// Number of clusters the Cluster Heap contains.
    pub cluster_count: U32,
    /// Cluster index of the first cluster of the root directory.
    ///
    /// Valid range: `[2, cluster_count + 1]`.
    pub first_cluster_of_root_directory: U32,
    /// Unique serial number, typically derived from format date and time.
    pub volume_serial_number: U32,
    /// Major/minor revision of the exFAT structures on this volume, high
    /// byte first. This reader only mounts major revision 1.
    pub file_system_revision: U16,
    /// Flags describing the status of various file system structures.
    /// Excluded from the boot region checksum; stale in the Backup Boot
    /// Sector.
    pub volume_flags: U16,
    /// log2(bytes per sector). Valid range: `[9, 12]`.
    pub bytes_per_sector_shift: u8,
    /// log2(sectors per cluster). Valid range: `[0, 25 - bytes_per_sector_shift]`.
    pub sectors_per_cluster_shift: u8,
    /// Number of FATs and Allocation Bitmaps the volume contains: 1, or 2 for
    /// TexFAT volumes. This reader never consults the second copy.
    pub number_of_fats: u8,
    /// Extended INT 13h drive number; presentational only.
    pub drive_select: u8,
    /// Percentage of allocated clusters in the Cluster Heap, or 0xFF if not
    /// available. Excluded from the boot region checksum.
    pub percent_in_use: u8,
    pub reserved: [u8; 7],
    pub boot_code: [u8; 390],
    /// Valid value is `0xAA55`; any other value invalidates the Boot Sector.
    pub boot_signature: [u8; 2],
}

impl BootSector {
    pub fn bytes_per_sector(&self) -> u64 {
        1u64 << self.bytes_per_sector_shift
    }

    pub fn bytes_per_cluster_shift(&self) -> u8 {
        self.bytes_per_sector_shift + self.sectors_per_cluster_shift
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        1u64 << self.bytes_per_cluster_shift()
    }
}
