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

/// An inode number, stable for the lifetime of the mount.
pub type Ino = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

/// Metadata surfaced by `stat`, already decoded from whatever on-disk
/// representation the concrete file system uses.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub ino: Ino,
    pub file_type: FileType,
    pub size: u64,
    pub physical_size: u64,
    pub blocks: u64,
    pub attributes: u16,
    pub modified: Timestamp,
    pub accessed: Timestamp,
    /// Presentational owner/permission bits, since the underlying file
    /// system may have no notion of a Unix owner or mode (exFAT doesn't);
    /// these come from whatever the mount was configured with, not from the
    /// on-disk record.
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// Volume-wide statistics surfaced by `statfs`.
#[derive(Debug, Clone, Copy)]
pub struct Statfs {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub name_len_max: u32,
    pub fsid: (u32, u32),
}

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

/// Whether a directory scan should continue past the entry just delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseControl {
    Next,
    Stop,
}

/// Receives entries from [`FileSystem::readdir`] one at a time.
///
/// This is the "algebraically cleaner" alternative to an inversion-of-control
/// callback pointer: the driver calls `entry` once per directory record it
/// successfully parses and obeys whatever [`ParseControl`] comes back.
pub trait DirSink {
    fn entry(&mut self, name: &str, ino: Ino, file_type: FileType) -> ParseControl;
}

impl<F: FnMut(&str, Ino, FileType) -> ParseControl> DirSink for F {
    fn entry(&mut self, name: &str, ino: Ino, file_type: FileType) -> ParseControl {
        self(name, ino, file_type)
    }
}

/// Generic read-only file system operations: lookup, readdir, stat, read.
pub trait FileSystem {
    /// Resolves `name` within the directory `parent`, returning its inode
    /// number.
    fn lookup(&self, parent: Ino, name: &str) -> Result<Ino>;

    /// Streams the contents of directory `dir` into `sink`, starting after
    /// the first `offset` entries already delivered by a previous call.
    fn readdir(&self, dir: Ino, offset: u64, sink: &mut dyn DirSink) -> Result<()>;

    /// Returns metadata for `ino`.
    fn stat(&self, ino: Ino) -> Result<Metadata>;

    /// Reads up to `buffer.len()` bytes of file `ino` starting at `offset`,
    /// returning the number of bytes actually copied (less than
    /// `buffer.len()` only at end of file).
    fn read(&self, ino: Ino, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Returns volume-wide statistics for `statfs`.
    fn statfs(&self) -> Result<Statfs>;
}

/// Stub client for a file system reachable only through an external
/// transport (e.g. a remote service). Kept as a documented placeholder for
/// embedders that don't link the concrete exfat crate directly.
pub struct FileSystemClient {}

impl FileSystem for FileSystemClient {
    fn lookup(&self, _parent: Ino, _name: &str) -> Result<Ino> {
        Err(Error::Unimplemented)
    }

    fn readdir(&self, _dir: Ino, _offset: u64, _sink: &mut dyn DirSink) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn stat(&self, _ino: Ino) -> Result<Metadata> {
        Err(Error::Unimplemented)
    }

    fn read(&self, _ino: Ino, _offset: u64, _buffer: &mut [u8]) -> Result<usize> {
        Err(Error::Unimplemented)
    }

    fn statfs(&self) -> Result<Statfs> {
        Err(Error::Unimplemented)
    }
}
