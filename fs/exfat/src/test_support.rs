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

//! An in-memory [`DataStorage`] double, used by this crate's own tests to
//! build synthetic exfat images without touching a real file or device.

use std::sync::RwLock;

use exfat_ds::{DataStorage, Error, IoError, Result};

pub struct MemoryStorage {
    blocks: RwLock<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new(len: usize) -> Self {
        Self {
            blocks: RwLock::new(vec![0u8; len]),
        }
    }

    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) {
        let mut guard = self.blocks.write().unwrap();
        let offset = offset as usize;
        guard[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u8(&self, offset: u64, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    pub fn write_u16(&self, offset: u64, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn write_u32(&self, offset: u64, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn write_u64(&self, offset: u64, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }
}

impl DataStorage for MemoryStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let guard = self.blocks.read().unwrap();
        let offset = offset as usize;
        if offset + buffer.len() > guard.len() {
            return Err(Error::Io(IoError::Read {
                offset: offset as u64,
                len: buffer.len(),
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            }));
        }
        buffer.copy_from_slice(&guard[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.write_bytes(offset, buffer);
        Ok(())
    }
}
