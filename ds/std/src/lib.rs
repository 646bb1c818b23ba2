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

use std::{fs::File, os::unix::fs::FileExt, path::Path};

use exfat_ds::{DataStorage, Error, IoError, Result};
use log::error;

pub struct DataStorageServer {
    file: File,
}

impl DataStorageServer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|source| {
            error!("failed to open {}: {source}", path.as_ref().display());
            Error::Io(IoError::Read {
                offset: 0,
                len: 0,
                source,
            })
        })?;
        Ok(Self { file })
    }
}

impl DataStorage for DataStorageServer {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buffer, offset)
            .map_err(|source| {
                Error::Io(IoError::Read {
                    offset,
                    len: buffer.len(),
                    source,
                })
            })
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.file.write_all_at(buffer, offset).map_err(|source| {
            Error::Io(IoError::Write {
                offset,
                len: buffer.len(),
                source,
            })
        })
    }
}
