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

use exfat_ds::{DataStorage, Result};
use zerocopy::{little_endian::U32, FromBytes, IntoBytes};

/// The first valid cluster index in the Cluster Heap.
pub const FIRST_CLUSTER: u32 = 2;
pub const CLUSTER_FREE: u32 = 0;
pub const CLUSTER_BAD: u32 = 0xFFFFFFF7;
pub const CLUSTER_EOF: u32 = 0xFFFFFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatValue {
    Free,
    Bad,
    Eof,
    Next(u32),
}

fn classify(raw: u32) -> FatValue {
    match raw {
        CLUSTER_FREE => FatValue::Free,
        CLUSTER_BAD => FatValue::Bad,
        CLUSTER_EOF => FatValue::Eof,
        next => FatValue::Next(next),
    }
}

/// Reads individual 32-bit FAT entries, keeping a single cached block buffer
/// across successive calls so that walking a chain one cluster at a time
/// doesn't re-read the same FAT block over and over.
pub struct FatReader<'a, DS: DataStorage> {
    data_storage: &'a DS,
    fat_block_offset: u64,
    bytes_per_block: u32,
    cached_block: Option<(u64, Vec<u8>)>,
}

impl<'a, DS: DataStorage> FatReader<'a, DS> {
    pub fn new(data_storage: &'a DS, fat_block_offset: u64, bytes_per_block: u32) -> Self {
        Self {
            data_storage,
            fat_block_offset,
            bytes_per_block,
            cached_block: None,
        }
    }

    pub fn read(&mut self, cluster: u32) -> Result<FatValue> {
        let entries_per_block = self.bytes_per_block / 4;
        let block = self.fat_block_offset + (cluster / entries_per_block) as u64;
        let slot = (cluster % entries_per_block) as usize * 4;

        if self.cached_block.as_ref().map(|(b, _)| *b) != Some(block) {
            let mut buffer = vec![0u8; self.bytes_per_block as usize];
            self.data_storage
                .read(block * self.bytes_per_block as u64, &mut buffer)?;
            self.cached_block = Some((block, buffer));
        }

        let buffer = &self.cached_block.as_ref().unwrap().1;
        let raw = U32::ref_from_bytes(&buffer[slot..slot + 4])
            .expect("slot is 4 bytes wide")
            .get();
        Ok(classify(raw))
    }
}
