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

//! The directory-entry parser (component I): reassembles a primary dirent
//! together with the secondary records that follow it into one flat 32-byte-
//! aligned buffer, verifies its checksum, and hands the buffer to whichever
//! consumer is driving the scan (rootdir scan, lookup, or readdir).

use std::sync::Arc;

use log::warn;

use exfat_ds::DataStorage;
use exfat_err::{CorruptionError, Error, Result};
use exfat_vfs::{DirSink, FileType, ParseControl, Timestamp};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    checksum::{sum16, sum16_skip},
    cluster::get_block,
    inode::{DataFlag, DirentLocation, Inode, InodeCache},
    upcase::UpcaseTable,
};

pub const CHUNK_SIZE: usize = 32;
const FLAG_IN_USE: u8 = 0x80;
const MAX_SUB_CHUNKS: usize = 255;
const MAX_CHUNKS: usize = 1 + MAX_SUB_CHUNKS;
const NAME_UNITS_PER_CHUNK: usize = 15;

const TYPE_EOD: u8 = 0x00;
const TYPE_BITMAP: u8 = 0x81;
const TYPE_UPCASE: u8 = 0x82;
const TYPE_DIRENT: u8 = 0x85;
const TYPE_DATA: u8 = 0xC0;
const TYPE_NAME: u8 = 0xC1;

const ATTR_DIRECTORY: u16 = 0x10;

#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawFileDirEntry {
    entry_type: u8,
    secondary_count: u8,
    checksum: U16,
    attributes: U16,
    reserved1: U16,
    create_time: U16,
    create_date: U16,
    mtime: U16,
    mdate: U16,
    atime: U16,
    adate: U16,
    create_time_cs: u8,
    mtime_cs: u8,
    create_utc_offset: u8,
    mtime_utc_offset: u8,
    atime_utc_offset: u8,
    reserved2: [u8; 7],
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawStreamExtension {
    entry_type: u8,
    general_secondary_flags: u8,
    reserved1: u8,
    name_length: u8,
    name_hash: U16,
    reserved2: U16,
    valid_data_length: U64,
    reserved3: U32,
    first_cluster: U32,
    data_length: U64,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawBitmap {
    entry_type: u8,
    bitmap_flags: u8,
    reserved: [u8; 18],
    first_cluster: U32,
    data_length: U64,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawUpcase {
    entry_type: u8,
    reserved1: [u8; 3],
    table_checksum: U32,
    reserved2: [u8; 12],
    first_cluster: U32,
    data_length: U64,
}

const NO_FAT_CHAIN_FLAG: u8 = 0x02;

/// Decodes a FAT-epoch date/time/10ms-increment triple into seconds and
/// nanoseconds since the Unix epoch.
fn decode_timestamp(time: u16, date: u16, time_cs: u8) -> Timestamp {
    let year = 1980 + (date >> 9) as i64;
    let month = ((date >> 5) & 0xF) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as i64;
    let minute = ((time >> 5) & 0x3F) as i64;
    let second = (time & 0x1F) as i64 * 2;

    // Howard Hinnant's days_from_civil, adapted for a 1980+ range.
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146097 + doe - 719468;

    let secs = days * 86400 + hour * 3600 + minute * 60 + second + (time_cs / 100) as i64;
    let nanos = (time_cs as u32 % 100) * 10_000_000;
    Timestamp { secs, nanos }
}

/// Builds an [`Inode`] from a freshly-assigned inode number and the raw bytes
/// of a complete DIRENT + DATA (+ NAME...) record, as delivered by
/// [`walk_directory`]. `parent_ino` is the inode number of the directory this
/// record was found in.
fn inode_from_record(ino: u64, parent_ino: u64, location: DirentLocation, record: &[u8]) -> Inode {
    let primary = RawFileDirEntry::ref_from_bytes(&record[0..CHUNK_SIZE]).expect("32 bytes");
    let data = RawStreamExtension::ref_from_bytes(&record[CHUNK_SIZE..2 * CHUNK_SIZE])
        .expect("32 bytes");

    let data_flag = if data.general_secondary_flags & NO_FAT_CHAIN_FLAG != 0 {
        DataFlag::Contiguous
    } else {
        DataFlag::FatChain
    };
    let is_directory = primary.attributes.get() & ATTR_DIRECTORY != 0;
    let modified = decode_timestamp(primary.mtime.get(), primary.mdate.get(), primary.mtime_cs);
    let accessed = decode_timestamp(primary.atime.get(), primary.adate.get(), 0);

    Inode::new(
        ino,
        parent_ino,
        location,
        data.first_cluster.get(),
        data_flag,
        is_directory,
        data.data_length.get(),
        data.valid_data_length.get(),
        primary.attributes.get(),
        modified,
        accessed,
    )
}

/// Outcome of reassembling one primary dirent and handing it to a consumer.
pub trait DirentConsumer {
    fn visit(&mut self, location: DirentLocation, record: &[u8]) -> Result<ParseControl>;
}

/// Reads the directory inode's blocks in order, reassembling each run of
/// `1 + secondary_count` chunks into one contiguous buffer and delivering it
/// to `consumer`. Stops at `EOD`, at the directory's size, or when the
/// consumer returns [`ParseControl::Stop`].
#[allow(clippy::too_many_arguments)]
pub fn walk_directory<DS: DataStorage>(
    dir: &Inode,
    data_storage: &DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    blocks_per_cluster: u32,
    cluster_heap_block_offset: u64,
    total_clusters: u32,
    consumer: &mut impl DirentConsumer,
) -> Result<()> {
    if dir.size % bytes_per_block as u64 != 0 {
        return Err(Error::Corruption(CorruptionError::DirectorySize));
    }
    let total_blocks = dir.size / bytes_per_block as u64;
    let bytes_per_block = bytes_per_block as usize;

    let fetch_block = |file_block: u64| -> Result<(u64, Vec<u8>)> {
        let Some((device_block, _)) = get_block(
            dir,
            data_storage,
            fat_block_offset,
            bytes_per_block as u32,
            blocks_per_cluster,
            cluster_heap_block_offset,
            total_clusters,
            file_block,
            1,
        )?
        else {
            return Err(Error::Corruption(CorruptionError::DirectorySize));
        };
        let mut buffer = vec![0u8; bytes_per_block];
        data_storage.read(device_block * bytes_per_block as u64, &mut buffer)?;
        Ok((device_block, buffer))
    };

    let mut file_block = 0u64;
    let mut offset = 0usize;
    let mut current: Option<(u64, u64, Vec<u8>)> = None; // (file_block, device_block, bytes)

    'scan: while file_block < total_blocks {
        if current.as_ref().map(|(fb, _, _)| *fb) != Some(file_block) {
            let (device_block, buffer) = fetch_block(file_block)?;
            current = Some((file_block, device_block, buffer));
        }

        let (entry_type, second_byte, device_block) = {
            let (_, device_block, buffer) = current.as_ref().unwrap();
            (buffer[offset], buffer[offset + 1], *device_block)
        };

        if entry_type == TYPE_EOD {
            break;
        }
        if entry_type & FLAG_IN_USE == 0 {
            offset += CHUNK_SIZE;
            if offset >= bytes_per_block {
                offset -= bytes_per_block;
                file_block += 1;
            }
            continue;
        }

        let chunk_count = if entry_type == TYPE_DIRENT {
            1 + second_byte as usize
        } else {
            1
        };
        if chunk_count > MAX_CHUNKS {
            return Err(Error::Corruption(CorruptionError::DirEntrySetTooLong));
        }
        let span_len = chunk_count * CHUNK_SIZE;
        let location = DirentLocation { block: device_block, offset: offset as u64 };

        let record = {
            let (_, _, buffer) = current.as_ref().unwrap();
            if offset + span_len <= bytes_per_block {
                buffer[offset..offset + span_len].to_vec()
            } else {
                let mut record = buffer[offset..].to_vec();
                let mut remaining = span_len - record.len();
                let mut fb = file_block + 1;
                while remaining > 0 {
                    if fb >= total_blocks {
                        return Err(Error::Corruption(CorruptionError::DirEntrySetTooLong));
                    }
                    let (_, tail) = fetch_block(fb)?;
                    let take = remaining.min(bytes_per_block);
                    record.extend_from_slice(&tail[..take]);
                    remaining -= take;
                    fb += 1;
                }
                record
            }
        };

        match consumer.visit(location, &record)? {
            ParseControl::Stop => break 'scan,
            ParseControl::Next => {}
        }

        offset += span_len;
        while offset >= bytes_per_block {
            offset -= bytes_per_block;
            file_block += 1;
            current = None;
        }
    }

    Ok(())
}

/// Consumer for the one-time rootdir scan at mount: locates the first
/// `BITMAP` and `UPCASE` primary entries.
#[derive(Default)]
pub struct RootdirScan {
    pub bitmap_cluster: u32,
    pub bitmap_size: u64,
    pub upcase_checksum: u32,
    pub upcase_cluster: u32,
    pub upcase_size: u64,
    found_bitmap: bool,
    found_upcase: bool,
}

impl DirentConsumer for RootdirScan {
    fn visit(&mut self, _location: DirentLocation, record: &[u8]) -> Result<ParseControl> {
        match record[0] {
            TYPE_BITMAP => {
                if self.found_bitmap {
                    warn!("found another free space bitmap in the root directory, ignored");
                } else {
                    let bitmap = RawBitmap::ref_from_bytes(&record[0..CHUNK_SIZE])
                        .expect("32 bytes");
                    self.bitmap_cluster = bitmap.first_cluster.get();
                    self.bitmap_size = bitmap.data_length.get();
                    self.found_bitmap = true;
                }
            }
            TYPE_UPCASE => {
                if self.found_upcase {
                    warn!("found another upper-case table in the root directory, ignored");
                } else {
                    let upcase = RawUpcase::ref_from_bytes(&record[0..CHUNK_SIZE])
                        .expect("32 bytes");
                    self.upcase_checksum = upcase.table_checksum.get();
                    self.upcase_cluster = upcase.first_cluster.get();
                    self.upcase_size = upcase.data_length.get();
                    self.found_upcase = true;
                }
            }
            _ => {}
        }
        Ok(ParseControl::Next)
    }
}

fn decode_checksum(record: &[u8]) -> (u16, u16) {
    let computed = sum16_skip(0, record, 2);
    let stored = RawFileDirEntry::ref_from_bytes(&record[0..CHUNK_SIZE])
        .expect("32 bytes")
        .checksum
        .get();
    (computed, stored)
}

/// Reads the `name_length`-bounded run of `NAME` chunks following a `DATA`
/// chunk at `record[CHUNK_SIZE..]` into UCS-2 code units.
fn read_name_units(record: &[u8], name_length: u8) -> Option<Vec<u16>> {
    let mut units = Vec::with_capacity(name_length as usize);
    let mut remaining = name_length as usize;
    let mut chunk_index = 2usize;
    while remaining > 0 {
        let start = chunk_index * CHUNK_SIZE;
        if record.len() < start + CHUNK_SIZE || record[start] != TYPE_NAME {
            return None;
        }
        let take = remaining.min(NAME_UNITS_PER_CHUNK);
        for i in 0..take {
            let lo = record[start + 2 + i * 2];
            let hi = record[start + 3 + i * 2];
            units.push(u16::from_le_bytes([lo, hi]));
        }
        remaining -= take;
        chunk_index += 1;
    }
    Some(units)
}

/// Consumer that resolves a single, already-upper-cased UCS-2 query against
/// a directory's entries.
pub struct Lookup<'a> {
    query: &'a [u16],
    hash: u16,
    upcase: &'a UpcaseTable,
    inode_cache: &'a InodeCache,
    parent_ino: u64,
    pub found: Option<Arc<Inode>>,
}

impl<'a> Lookup<'a> {
    pub fn new(
        query: &'a [u16],
        hash: u16,
        upcase: &'a UpcaseTable,
        inode_cache: &'a InodeCache,
        parent_ino: u64,
    ) -> Self {
        Self { query, hash, upcase, inode_cache, parent_ino, found: None }
    }
}

impl<'a> DirentConsumer for Lookup<'a> {
    fn visit(&mut self, location: DirentLocation, record: &[u8]) -> Result<ParseControl> {
        if record[0] != TYPE_DIRENT {
            return Ok(ParseControl::Next);
        }
        if record.len() < 2 * CHUNK_SIZE || record[CHUNK_SIZE] != TYPE_DATA {
            return Ok(ParseControl::Next);
        }
        let data = RawStreamExtension::ref_from_bytes(&record[CHUNK_SIZE..2 * CHUNK_SIZE])
            .expect("32 bytes");
        if data.name_length as usize != self.query.len() {
            return Ok(ParseControl::Next);
        }
        if data.name_hash.get() != self.hash {
            return Ok(ParseControl::Next);
        }

        let Some(units) = read_name_units(record, data.name_length) else {
            return Ok(ParseControl::Next);
        };
        let matches = units
            .iter()
            .zip(self.query.iter())
            .all(|(&stored, &query)| self.upcase.towupper(stored) == query);
        if !matches {
            return Ok(ParseControl::Next);
        }

        let (computed, stored) = decode_checksum(record);
        if computed != stored {
            return Err(Error::Corruption(CorruptionError::DirEntryChecksum {
                block: location.block,
                offset: location.offset,
            }));
        }

        let parent_ino = self.parent_ino;
        self.found = Some(self.inode_cache.get_or_insert(location, |ino| {
            Ok(inode_from_record(ino, parent_ino, location, record))
        })?);
        Ok(ParseControl::Stop)
    }
}

/// Consumer that decodes every real directory entry (the `.`/`..` pseudo
/// entries are synthesized by the caller, not by this scan) and feeds it to
/// a [`DirSink`], honoring a caller-supplied number of entries to skip.
pub struct Readdir<'a> {
    inode_cache: &'a InodeCache,
    sink: &'a mut dyn DirSink,
    skip: u64,
    seen: u64,
    parent_ino: u64,
}

impl<'a> Readdir<'a> {
    pub fn new(inode_cache: &'a InodeCache, sink: &'a mut dyn DirSink, skip: u64, parent_ino: u64) -> Self {
        Self { inode_cache, sink, skip, seen: 0, parent_ino }
    }
}

impl<'a> DirentConsumer for Readdir<'a> {
    fn visit(&mut self, location: DirentLocation, record: &[u8]) -> Result<ParseControl> {
        if record[0] != TYPE_DIRENT {
            return Ok(ParseControl::Next);
        }
        if record.len() < 2 * CHUNK_SIZE || record[CHUNK_SIZE] != TYPE_DATA {
            return Ok(ParseControl::Next);
        }
        let data = RawStreamExtension::ref_from_bytes(&record[CHUNK_SIZE..2 * CHUNK_SIZE])
            .expect("32 bytes");
        let Some(units) = read_name_units(record, data.name_length) else {
            return Ok(ParseControl::Next);
        };

        let (computed, stored) = decode_checksum(record);
        if computed != stored {
            return Err(Error::Corruption(CorruptionError::DirEntryChecksum {
                block: location.block,
                offset: location.offset,
            }));
        }

        self.seen += 1;
        if self.seen <= self.skip {
            return Ok(ParseControl::Next);
        }

        let name = String::from_utf16_lossy(&units);
        let parent_ino = self.parent_ino;
        let inode = self
            .inode_cache
            .get_or_insert(location, |ino| Ok(inode_from_record(ino, parent_ino, location, record)))?;
        let file_type = if inode.is_directory { FileType::Directory } else { FileType::Regular };
        Ok(self.sink.entry(&name, inode.ino, file_type))
    }
}

/// Computes the name hash used both to seed a [`Lookup`] and to verify a
/// `DATA` record's stored `name_hash`: `sum16` over the little-endian bytes
/// of the already-upper-cased query.
pub fn name_hash(upcased: &[u16]) -> u16 {
    let bytes: Vec<u8> = upcased.iter().flat_map(|u| u.to_le_bytes()).collect();
    sum16(0, &bytes)
}
