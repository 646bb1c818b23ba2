//! Error types shared by every layer of the exfat reader, from the block
//! storage trait down to the public file system operations.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not implemented")]
    Unimplemented,
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Corruption(#[from] CorruptionError),
    #[error("no such file or directory")]
    NotFound,
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("name too long ({len} code units, max {max})")]
    NameTooLong { len: usize, max: usize },
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures from the block/page access boundary (component A).
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("read-only")]
    ReadOnly,
    #[error("device read failed at offset {offset} ({len} bytes): {source}")]
    Read {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("device write failed at offset {offset} ({len} bytes): {source}")]
    Write {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Structural invariants of the volume that, once violated, make further
/// operations on the affected object unsafe to continue.
#[derive(thiserror::Error, Debug)]
pub enum CorruptionError {
    #[error("invalid boot sector: {0}")]
    BootSector(String),
    #[error("boot region checksum mismatch (region starting at block {block})")]
    BootChecksum { block: u64 },
    #[error("directory entry checksum mismatch at block {block}, offset {offset}")]
    DirEntryChecksum { block: u64, offset: u64 },
    #[error("cluster chain is corrupt at cluster {0}")]
    ClusterChain(u32),
    #[error("bad cluster {0} encountered while walking the FAT")]
    BadCluster(u32),
    #[error("directory size is not a multiple of the block size")]
    DirectorySize,
    #[error("directory entry set spans more blocks than the parser can buffer")]
    DirEntrySetTooLong,
    #[error("an internal lock was poisoned by a prior panic")]
    LockPoisoned,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Lock poisoning can only follow a prior panic mid-mutation; the volume is
/// already latched as panicked by that point, so callers should treat it the
/// same as any other corruption.
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Corruption(CorruptionError::LockPoisoned)
    }
}
