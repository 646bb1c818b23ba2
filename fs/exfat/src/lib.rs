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

//! Read-only exFAT file system reader.
//!
//! [`FileSystemServer`] mounts a volume over any [`exfat_ds::DataStorage`]
//! and implements [`exfat_vfs::FileSystem`] on top of it. The on-disk layout
//! is decoded by the modules below, split along the same lines the original
//! kernel driver is: boot sector and checksums ([`mount`]), the FAT and its
//! cluster chains ([`fat`], [`cluster`]), directory entries ([`dirent`]),
//! the free-space bitmap and up-case table ([`bitmap`], [`upcase`]), and the
//! live inode table ([`inode`]).

mod bitmap;
mod boot_sector;
mod cache;
mod checksum;
mod cluster;
mod dirent;
mod fat;
mod inode;
mod mount;
mod options;
mod upcase;

#[cfg(test)]
mod test_support;

use exfat_ds::DataStorage;
use exfat_err::{Error, Result};
use exfat_vfs::{DirSink, FileSystem, FileType, Ino, Metadata, ParseControl, Statfs};

pub use crate::mount::ExfatVolume;
pub use crate::options::ExfatMountOptions;

use crate::{
    cluster::get_block,
    dirent::{name_hash, walk_directory, Lookup, Readdir},
};

/// The assembled POSIX-ish block size `stat`'s `blocks` field is reported
/// in, independent of the volume's actual cluster size (matches
/// `generic_fillattr`'s accounting unit).
const STAT_BLOCK_SIZE: u64 = 512;

/// Maximum number of UTF-16 code units a file name may contain.
const MAX_NAME_UNITS: usize = 255;

/// POSIX file-type bits for the presentational `mode` `stat` reports, since
/// exFAT itself has no notion of either.
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

/// A mounted, read-only exFAT volume.
///
/// Wraps the [`DataStorage`] the volume lives on together with everything
/// [`mount::mount`] learned about it, and implements [`FileSystem`] in terms
/// of the directory and cluster-chain primitives in [`dirent`] and
/// [`cluster`].
pub struct FileSystemServer<DS: DataStorage> {
    data_storage: DS,
    volume: ExfatVolume,
}

impl<DS: DataStorage> FileSystemServer<DS> {
    /// Mounts the volume on `data_storage`, validating the boot region and
    /// bringing up the root inode, bitmap, and up-case table.
    pub fn mount(data_storage: DS, options: ExfatMountOptions) -> Result<Self> {
        let volume = mount::mount(&data_storage, options)?;
        Ok(Self { data_storage, volume })
    }

    /// Exposes the geometry and statistics learned at mount time, for
    /// embedders implementing `statfs`.
    pub fn volume(&self) -> &ExfatVolume {
        &self.volume
    }

    fn inode(&self, ino: Ino) -> Result<std::sync::Arc<inode::Inode>> {
        self.volume.inodes.get_by_ino(ino)?.ok_or(Error::NotFound)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(&self, dir: &inode::Inode, consumer: &mut impl dirent::DirentConsumer) -> Result<()> {
        walk_directory(
            dir,
            &self.data_storage,
            self.volume.fat_block_offset,
            self.volume.bytes_per_block,
            self.volume.blocks_per_cluster,
            self.volume.cluster_heap_block_offset,
            self.volume.total_clusters,
            consumer,
        )
    }
}

impl<DS: DataStorage> FileSystem for FileSystemServer<DS> {
    fn lookup(&self, parent: Ino, name: &str) -> Result<Ino> {
        let parent_inode = self.inode(parent)?;
        if !parent_inode.is_directory {
            return Err(Error::NotFound);
        }

        let query: Vec<u16> = name.encode_utf16().collect();
        if query.len() > MAX_NAME_UNITS {
            return Err(Error::NameTooLong { len: query.len(), max: MAX_NAME_UNITS });
        }
        let upcased: Vec<u16> = query.iter().map(|&u| self.volume.upcase.towupper(u)).collect();
        let hash = name_hash(&upcased);

        let mut lookup = Lookup::new(&upcased, hash, &self.volume.upcase, &self.volume.inodes, parent);
        self.walk(&parent_inode, &mut lookup)?;
        lookup.found.map(|inode| inode.ino).ok_or(Error::NotFound)
    }

    fn readdir(&self, dir: Ino, offset: u64, sink: &mut dyn DirSink) -> Result<()> {
        let dir_inode = self.inode(dir)?;
        if !dir_inode.is_directory {
            return Err(Error::NotFound);
        }

        // Synthesize the two pseudo-entries exFAT has no on-disk dirent for.
        if offset == 0 && sink.entry(".", dir_inode.ino, FileType::Directory) == ParseControl::Stop {
            return Ok(());
        }
        if offset <= 1
            && sink.entry("..", dir_inode.parent_ino, FileType::Directory) == ParseControl::Stop
        {
            return Ok(());
        }
        let skip = offset.saturating_sub(2);

        let mut readdir = Readdir::new(&self.volume.inodes, sink, skip, dir_inode.ino);
        self.walk(&dir_inode, &mut readdir)
    }

    fn stat(&self, ino: Ino) -> Result<Metadata> {
        let inode = self.inode(ino)?;
        let mode = if inode.is_directory {
            S_IFDIR | self.volume.options.dmode
        } else {
            S_IFREG | self.volume.options.fmode
        };
        Ok(Metadata {
            ino: inode.ino,
            file_type: if inode.is_directory { FileType::Directory } else { FileType::Regular },
            size: inode.size,
            physical_size: inode.physical_size,
            blocks: inode.size.div_ceil(STAT_BLOCK_SIZE),
            attributes: inode.attributes,
            modified: inode.modified,
            accessed: inode.accessed,
            uid: self.volume.options.uid,
            gid: self.volume.options.gid,
            mode,
        })
    }

    fn statfs(&self) -> Result<Statfs> {
        let cluster_size = (self.volume.bytes_per_block as u64) * (self.volume.blocks_per_cluster as u64);
        Ok(Statfs {
            block_size: cluster_size,
            blocks: self.volume.total_clusters as u64,
            blocks_free: self.volume.free_clusters as u64,
            blocks_available: self.volume.free_clusters as u64,
            name_len_max: MAX_NAME_UNITS as u32,
            fsid: (self.volume.serial_number, 0),
        })
    }

    fn read(&self, ino: Ino, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let inode = self.inode(ino)?;
        if offset >= inode.size {
            return Ok(0);
        }
        let want = buffer.len().min((inode.size - offset) as usize);
        let bytes_per_block = self.volume.bytes_per_block as u64;

        let mut copied = 0usize;
        let mut file_block = offset / bytes_per_block;
        let mut block_skip = (offset % bytes_per_block) as usize;

        while copied < want {
            let Some((device_block, mapped_blocks)) = get_block(
                &inode,
                &self.data_storage,
                self.volume.fat_block_offset,
                self.volume.bytes_per_block,
                self.volume.blocks_per_cluster,
                self.volume.cluster_heap_block_offset,
                self.volume.total_clusters,
                file_block,
                u32::MAX / 2,
            )?
            else {
                break;
            };

            let run_bytes = bytes_per_block as usize * mapped_blocks as usize;
            let mut run = vec![0u8; run_bytes];
            self.data_storage.read(device_block * bytes_per_block, &mut run)?;

            let available = run_bytes - block_skip;
            let take = available.min(want - copied);
            buffer[copied..copied + take].copy_from_slice(&run[block_skip..block_skip + take]);

            copied += take;
            file_block += mapped_blocks as u64;
            block_skip = 0;
        }

        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStorage;
    use exfat_err::CorruptionError;

    /// Builds a tiny but complete volume: boot region (with valid
    /// checksums), one FAT, a root directory holding the bitmap, the
    /// up-case table, and a single file "HELLO.TXT".
    fn write_minimal_volume() -> MemoryStorage {
        const BYTES_PER_BLOCK: u64 = 512;
        const BLOCKS_PER_CLUSTER: u64 = 1;
        const FAT_BLOCK: u64 = 24;
        const HEAP_BLOCK: u64 = 25;
        // clusters: 2=bitmap, 3=upcase, 4=root, 5=file data
        const BITMAP_CLUSTER: u32 = 2;
        const UPCASE_CLUSTER: u32 = 3;
        const ROOT_CLUSTER: u32 = 4;
        const FILE_CLUSTER: u32 = 5;
        const TOTAL_CLUSTERS: u32 = 8;

        let storage = MemoryStorage::new(
            (HEAP_BLOCK as usize + TOTAL_CLUSTERS as usize) * BYTES_PER_BLOCK as usize,
        );

        // -- Boot sector --
        storage.write_bytes(3, &boot_sector::FILE_SYSTEM_NAME);
        storage.write_u64(72, (HEAP_BLOCK + TOTAL_CLUSTERS as u64) as u64);
        storage.write_u32(80, FAT_BLOCK as u32);
        storage.write_u32(84, 1);
        storage.write_u32(88, HEAP_BLOCK as u32);
        storage.write_u32(92, TOTAL_CLUSTERS);
        storage.write_u32(96, ROOT_CLUSTER);
        storage.write_u8(108, 9); // 512-byte sectors
        storage.write_u8(109, 0); // 1 sector per cluster
        storage.write_u8(110, 1);
        storage.write_bytes(510, &boot_sector::BOOT_SIGNATURE);

        // -- Boot region checksum (main region) --
        let mut block0 = vec![0u8; BYTES_PER_BLOCK as usize];
        storage.read(0, &mut block0).unwrap();
        let sum = checksum::sum32_skip(0, &block0, &boot_sector::CHECKSUM_SKIP_OFFSETS);
        let mut sum = sum;
        for i in 1..boot_sector::BOOT_REGION_BLOCKS - 1 {
            let mut block = vec![0u8; BYTES_PER_BLOCK as usize];
            storage.read(i * BYTES_PER_BLOCK, &mut block).unwrap();
            sum = checksum::sum32(sum, &block);
        }
        for word in 0..BYTES_PER_BLOCK / 4 {
            storage.write_u32(
                (boot_sector::BOOT_REGION_BLOCKS - 1) * BYTES_PER_BLOCK + word * 4,
                sum,
            );
        }

        // -- Backup boot region: identical copy --
        for block in 0..boot_sector::BOOT_REGION_BLOCKS {
            let mut buf = vec![0u8; BYTES_PER_BLOCK as usize];
            storage.read(block * BYTES_PER_BLOCK, &mut buf).unwrap();
            storage.write_bytes((boot_sector::BACKUP_BOOT_REGION_BLOCK + block) * BYTES_PER_BLOCK, &buf);
        }

        // -- FAT --
        let fat_byte = |cluster: u32| FAT_BLOCK * BYTES_PER_BLOCK + cluster as u64 * 4;
        storage.write_u32(fat_byte(BITMAP_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(UPCASE_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(ROOT_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(FILE_CLUSTER), 0xFFFFFFFF);

        let cluster_block = |cluster: u32| HEAP_BLOCK + (cluster - 2) as u64 * BLOCKS_PER_CLUSTER;

        // -- Bitmap: clusters 2..5 in use (bits 0..3 set) --
        storage.write_u8(cluster_block(BITMAP_CLUSTER) * BYTES_PER_BLOCK, 0b0000_1111);

        // -- Up-case table: a tiny literal run identity-mapping 'H'..'X' --
        let mut upcase_bytes = Vec::new();
        for cp in 0x48u16..=0x58u16 {
            upcase_bytes.extend_from_slice(&cp.to_le_bytes());
        }
        let upcase_block = cluster_block(UPCASE_CLUSTER) * BYTES_PER_BLOCK;
        storage.write_bytes(upcase_block, &upcase_bytes);
        let upcase_checksum = checksum::sum32(0, &upcase_bytes);

        // -- Root directory: BITMAP, UPCASE, and one FILE entry set --
        let root_block = cluster_block(ROOT_CLUSTER) * BYTES_PER_BLOCK;
        let mut offset = root_block;

        // BITMAP primary entry
        storage.write_u8(offset, 0x81);
        storage.write_u32(offset + 20, BITMAP_CLUSTER);
        storage.write_u64(offset + 24, BYTES_PER_BLOCK);
        offset += 32;

        // UPCASE primary entry
        storage.write_u8(offset, 0x82);
        storage.write_u32(offset + 4, upcase_checksum);
        storage.write_u32(offset + 20, UPCASE_CLUSTER);
        storage.write_u64(offset + 24, upcase_bytes.len() as u64);
        offset += 32;

        // FILE entry set: DIRENT(85) + DATA(C0) + NAME(C1), name "HELLO"
        let file_record_start = offset;
        let name: Vec<u16> = "HELLO".encode_utf16().collect();
        storage.write_u8(offset, 0x85);
        storage.write_u8(offset + 1, 2); // secondary_count
        offset += 32;

        storage.write_u8(offset, 0xC0);
        storage.write_u8(offset + 3, name.len() as u8);
        let name_bytes: Vec<u8> = name.iter().flat_map(|u| u.to_le_bytes()).collect();
        let hash = checksum::sum16(0, &name_bytes);
        storage.write_u16(offset + 4, hash);
        storage.write_u64(offset + 8, 5); // valid_data_length
        storage.write_u32(offset + 20, FILE_CLUSTER);
        storage.write_u64(offset + 24, 5); // data_length
        offset += 32;

        storage.write_u8(offset, 0xC1);
        storage.write_bytes(offset + 2, &name_bytes);
        offset += 32;

        let record_len = (offset - file_record_start) as usize;
        let mut record = vec![0u8; record_len];
        storage.read(file_record_start, &mut record).unwrap();
        let set_checksum = checksum::sum16_skip(0, &record, 2);
        storage.write_u16(file_record_start + 2, set_checksum);

        // -- File data --
        storage.write_bytes(cluster_block(FILE_CLUSTER) * BYTES_PER_BLOCK, b"HELLO");

        storage
    }

    /// Like [`write_minimal_volume`], but the root directory also holds a
    /// second file, "BIG.BIN", whose data spans two non-contiguous clusters
    /// (6 and 8, with cluster 7 left free) so reads must cross a fragment
    /// boundary.
    fn write_volume_with_fragmented_file() -> MemoryStorage {
        const BYTES_PER_BLOCK: u64 = 512;
        const BLOCKS_PER_CLUSTER: u64 = 1;
        const FAT_BLOCK: u64 = 24;
        const HEAP_BLOCK: u64 = 25;
        const BITMAP_CLUSTER: u32 = 2;
        const UPCASE_CLUSTER: u32 = 3;
        const ROOT_CLUSTER: u32 = 4;
        const FILE_CLUSTER: u32 = 5;
        const FRAG_CLUSTER_A: u32 = 6;
        const FRAG_CLUSTER_B: u32 = 8;
        const TOTAL_CLUSTERS: u32 = 10;
        const FRAG_DATA_LEN: u64 = 600;

        let storage = MemoryStorage::new(
            (HEAP_BLOCK as usize + TOTAL_CLUSTERS as usize) * BYTES_PER_BLOCK as usize,
        );

        storage.write_bytes(3, &boot_sector::FILE_SYSTEM_NAME);
        storage.write_u64(72, (HEAP_BLOCK + TOTAL_CLUSTERS as u64) as u64);
        storage.write_u32(80, FAT_BLOCK as u32);
        storage.write_u32(84, 1);
        storage.write_u32(88, HEAP_BLOCK as u32);
        storage.write_u32(92, TOTAL_CLUSTERS);
        storage.write_u32(96, ROOT_CLUSTER);
        storage.write_u8(108, 9);
        storage.write_u8(109, 0);
        storage.write_u8(110, 1);
        storage.write_bytes(510, &boot_sector::BOOT_SIGNATURE);

        let mut block0 = vec![0u8; BYTES_PER_BLOCK as usize];
        storage.read(0, &mut block0).unwrap();
        let mut sum = checksum::sum32_skip(0, &block0, &boot_sector::CHECKSUM_SKIP_OFFSETS);
        for i in 1..boot_sector::BOOT_REGION_BLOCKS - 1 {
            let mut block = vec![0u8; BYTES_PER_BLOCK as usize];
            storage.read(i * BYTES_PER_BLOCK, &mut block).unwrap();
            sum = checksum::sum32(sum, &block);
        }
        for word in 0..BYTES_PER_BLOCK / 4 {
            storage.write_u32(
                (boot_sector::BOOT_REGION_BLOCKS - 1) * BYTES_PER_BLOCK + word * 4,
                sum,
            );
        }

        for block in 0..boot_sector::BOOT_REGION_BLOCKS {
            let mut buf = vec![0u8; BYTES_PER_BLOCK as usize];
            storage.read(block * BYTES_PER_BLOCK, &mut buf).unwrap();
            storage.write_bytes((boot_sector::BACKUP_BOOT_REGION_BLOCK + block) * BYTES_PER_BLOCK, &buf);
        }

        let fat_byte = |cluster: u32| FAT_BLOCK * BYTES_PER_BLOCK + cluster as u64 * 4;
        storage.write_u32(fat_byte(BITMAP_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(UPCASE_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(ROOT_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(FILE_CLUSTER), 0xFFFFFFFF);
        storage.write_u32(fat_byte(FRAG_CLUSTER_A), FRAG_CLUSTER_B);
        storage.write_u32(fat_byte(FRAG_CLUSTER_B), 0xFFFFFFFF);

        let cluster_block = |cluster: u32| HEAP_BLOCK + (cluster - 2) as u64 * BLOCKS_PER_CLUSTER;

        storage.write_u8(cluster_block(BITMAP_CLUSTER) * BYTES_PER_BLOCK, 0b0101_1111);

        let mut upcase_bytes = Vec::new();
        for cp in 0x40u16..=0x60u16 {
            upcase_bytes.extend_from_slice(&cp.to_le_bytes());
        }
        let upcase_block = cluster_block(UPCASE_CLUSTER) * BYTES_PER_BLOCK;
        storage.write_bytes(upcase_block, &upcase_bytes);
        let upcase_checksum = checksum::sum32(0, &upcase_bytes);

        let root_block = cluster_block(ROOT_CLUSTER) * BYTES_PER_BLOCK;
        let mut offset = root_block;

        storage.write_u8(offset, 0x81);
        storage.write_u32(offset + 20, BITMAP_CLUSTER);
        storage.write_u64(offset + 24, BYTES_PER_BLOCK);
        offset += 32;

        storage.write_u8(offset, 0x82);
        storage.write_u32(offset + 4, upcase_checksum);
        storage.write_u32(offset + 20, UPCASE_CLUSTER);
        storage.write_u64(offset + 24, upcase_bytes.len() as u64);
        offset += 32;

        let file_record_start = offset;
        let name: Vec<u16> = "HELLO".encode_utf16().collect();
        storage.write_u8(offset, 0x85);
        storage.write_u8(offset + 1, 2);
        offset += 32;
        storage.write_u8(offset, 0xC0);
        storage.write_u8(offset + 3, name.len() as u8);
        let name_bytes: Vec<u8> = name.iter().flat_map(|u| u.to_le_bytes()).collect();
        storage.write_u16(offset + 4, checksum::sum16(0, &name_bytes));
        storage.write_u64(offset + 8, 5);
        storage.write_u32(offset + 20, FILE_CLUSTER);
        storage.write_u64(offset + 24, 5);
        offset += 32;
        storage.write_u8(offset, 0xC1);
        storage.write_bytes(offset + 2, &name_bytes);
        offset += 32;
        let record_len = (offset - file_record_start) as usize;
        let mut record = vec![0u8; record_len];
        storage.read(file_record_start, &mut record).unwrap();
        storage.write_u16(file_record_start + 2, checksum::sum16_skip(0, &record, 2));

        let frag_record_start = offset;
        let frag_name: Vec<u16> = "BIG.BIN".encode_utf16().collect();
        storage.write_u8(offset, 0x85);
        storage.write_u8(offset + 1, 2);
        offset += 32;
        storage.write_u8(offset, 0xC0);
        storage.write_u8(offset + 1, 0x01); // fat-chain, not contiguous
        storage.write_u8(offset + 3, frag_name.len() as u8);
        let frag_name_bytes: Vec<u8> = frag_name.iter().flat_map(|u| u.to_le_bytes()).collect();
        storage.write_u16(offset + 4, checksum::sum16(0, &frag_name_bytes));
        storage.write_u64(offset + 8, FRAG_DATA_LEN);
        storage.write_u32(offset + 20, FRAG_CLUSTER_A);
        storage.write_u64(offset + 24, FRAG_DATA_LEN);
        offset += 32;
        storage.write_u8(offset, 0xC1);
        storage.write_bytes(offset + 2, &frag_name_bytes);
        offset += 32;
        let frag_record_len = (offset - frag_record_start) as usize;
        let mut frag_record = vec![0u8; frag_record_len];
        storage.read(frag_record_start, &mut frag_record).unwrap();
        storage.write_u16(frag_record_start + 2, checksum::sum16_skip(0, &frag_record, 2));

        storage.write_bytes(cluster_block(FILE_CLUSTER) * BYTES_PER_BLOCK, b"HELLO");

        let cluster_a_bytes = vec![0xAAu8; BYTES_PER_BLOCK as usize];
        let cluster_b_bytes = vec![0xBBu8; (FRAG_DATA_LEN - BYTES_PER_BLOCK) as usize];
        storage.write_bytes(cluster_block(FRAG_CLUSTER_A) * BYTES_PER_BLOCK, &cluster_a_bytes);
        storage.write_bytes(cluster_block(FRAG_CLUSTER_B) * BYTES_PER_BLOCK, &cluster_b_bytes);

        storage
    }

    #[test]
    fn reads_a_file_fragmented_across_non_contiguous_clusters() {
        let storage = write_volume_with_fragmented_file();
        let fs = FileSystemServer::mount(storage, ExfatMountOptions::default()).unwrap();
        let root = fs.volume().root.ino;

        let ino = fs.lookup(root, "big.bin").unwrap();
        let stat = fs.stat(ino).unwrap();
        assert_eq!(stat.size, 600);

        let mut buffer = vec![0u8; 600];
        let read = fs.read(ino, 0, &mut buffer).unwrap();
        assert_eq!(read, 600);
        assert!(buffer[..512].iter().all(|&b| b == 0xAA));
        assert!(buffer[512..].iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn statfs_reports_cluster_geometry_and_name_limit() {
        let storage = write_minimal_volume();
        let fs = FileSystemServer::mount(storage, ExfatMountOptions::default()).unwrap();
        let statfs = fs.statfs().unwrap();
        assert_eq!(statfs.block_size, 512);
        assert_eq!(statfs.blocks, 8);
        assert_eq!(statfs.name_len_max, 255);
    }

    #[test]
    fn stat_reports_configured_uid_gid_and_mode_bits() {
        let storage = write_minimal_volume();
        let options = ExfatMountOptions {
            uid: 1000,
            gid: 1000,
            ..ExfatMountOptions::default()
        };
        let fs = FileSystemServer::mount(storage, options).unwrap();
        let root = fs.volume().root.ino;

        let root_stat = fs.stat(root).unwrap();
        assert_eq!(root_stat.uid, 1000);
        assert_eq!(root_stat.gid, 1000);
        assert_eq!(root_stat.mode & S_IFDIR, S_IFDIR);

        let ino = fs.lookup(root, "hello").unwrap();
        let file_stat = fs.stat(ino).unwrap();
        assert_eq!(file_stat.mode & S_IFREG, S_IFREG);
    }

    #[test]
    fn mounts_and_reads_a_minimal_volume() {
        let storage = write_minimal_volume();
        let fs = FileSystemServer::mount(storage, ExfatMountOptions::default()).unwrap();

        let root = fs.volume().root.ino;
        let stat = fs.stat(root).unwrap();
        assert_eq!(stat.file_type, FileType::Directory);

        let ino = fs.lookup(root, "hello").unwrap();
        let stat = fs.stat(ino).unwrap();
        assert_eq!(stat.file_type, FileType::Regular);
        assert_eq!(stat.size, 5);

        let mut buffer = [0u8; 5];
        let read = fs.read(ino, 0, &mut buffer).unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buffer, b"HELLO");
    }

    #[test]
    fn rejects_an_undersized_free_space_bitmap() {
        let storage = write_minimal_volume();
        // The bitmap dirent's data_length field, at root_block + 24: shrink
        // it below ceil(total_clusters / 8) = 1 byte for 8 clusters.
        const ROOT_BLOCK_BYTES: u64 = 27 * 512;
        storage.write_u64(ROOT_BLOCK_BYTES + 24, 0);

        let err = FileSystemServer::mount(storage, ExfatMountOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Corruption(CorruptionError::BootSector(_))));
    }

    #[test]
    fn lookup_of_missing_name_fails() {
        let storage = write_minimal_volume();
        let fs = FileSystemServer::mount(storage, ExfatMountOptions::default()).unwrap();
        let root = fs.volume().root.ino;
        assert!(matches!(fs.lookup(root, "nope.txt"), Err(Error::NotFound)));
    }

    #[test]
    fn readdir_synthesizes_dot_and_dotdot_first() {
        let storage = write_minimal_volume();
        let fs = FileSystemServer::mount(storage, ExfatMountOptions::default()).unwrap();
        let root = fs.volume().root.ino;

        let mut names = Vec::new();
        let mut sink = |name: &str, _ino: Ino, _ft: FileType| {
            names.push(name.to_string());
            ParseControl::Next
        };
        fs.readdir(root, 0, &mut sink).unwrap();

        assert_eq!(names[0], ".");
        assert_eq!(names[1], "..");
        assert!(names.iter().any(|n| n == "HELLO"));
    }
}
