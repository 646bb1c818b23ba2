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

pub use exfat_err::*;

/// Read-only block storage backing a volume. Implementations are supplied by
/// the embedder; everything above this trait only ever reads.
pub trait DataStorage {
    /// Reads `buffer.len()` bytes starting at the given byte offset.
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    /// Writes `buffer` at the given byte offset.
    ///
    /// The exfat reader built on top of this trait never calls this method;
    /// it exists so that [`DataStorage`] implementations can be shared with
    /// writable file systems in the same family.
    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;
}
