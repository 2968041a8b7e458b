//! Block store abstraction.
//!
//! The tree never touches files directly. It talks to a `BlockStore`, which
//! exposes block-addressed reads and writes plus a couple of typed reads at
//! arbitrary byte offsets (used only for the header records). This lets the
//! tree run against a real file in production and an in-memory store in tests.

use std::path::PathBuf;

use crate::storage::block::{Block, BlockId};

/// Errors that can occur during block store operations.
#[derive(Debug)]
pub enum StorageError {
    /// The store was used before being opened or after being closed.
    NotOpen,
    /// The file exists but is not a block file this crate can use.
    InvalidFile(String),
    /// The path could not be opened or created.
    InvalidFileName {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A block size too small to hold the header records.
    InvalidBlockSize(u32),
    /// Fewer bytes than requested were available at an offset.
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },
    /// Any other I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen => write!(f, "file not open"),
            Self::InvalidFile(reason) => write!(f, "invalid file: {reason}"),
            Self::InvalidFileName { path, source } => {
                write!(f, "invalid file name {}: {source}", path.display())
            }
            Self::InvalidBlockSize(size) => write!(f, "invalid block size: {size}"),
            Self::ShortRead {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "short read at offset {offset}: expected {expected} bytes, got {actual}"
            ),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::InvalidFileName { source: e, .. } => Some(e),
            Self::NotOpen
            | Self::InvalidFile(_)
            | Self::InvalidBlockSize(_)
            | Self::ShortRead { .. } => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Block-addressed storage consumed by the tree.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_block` returns exactly `block_size` bytes or fails with `ShortRead`
/// - `read_block` returns the last content written to that position
/// - `write_block` may target any position, growing the store with zeroed blocks
/// - every method fails with `NotOpen` once the store is closed
pub trait BlockStore {
    /// Whether the store is currently open.
    fn is_open(&self) -> bool;

    /// Size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Read the block at the given position.
    fn read_block(&mut self, id: BlockId) -> Result<Block, StorageError>;

    /// Write a block at the given position.
    fn write_block(&mut self, id: BlockId, block: &Block) -> Result<(), StorageError>;

    /// Append a block at the end of the store and return its position.
    fn write_new_block(&mut self, block: &Block) -> Result<BlockId, StorageError>;

    /// Read a little-endian u32 at a byte offset.
    fn read_u32(&mut self, offset: u64) -> Result<u32, StorageError>;

    /// Read `len` raw bytes at a byte offset.
    fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let e = StorageError::ShortRead {
            offset: 8192,
            expected: 4096,
            actual: 12,
        };
        assert!(e.to_string().contains("offset 8192"));
        assert!(e.to_string().contains("got 12"));

        assert_eq!(StorageError::NotOpen.to_string(), "file not open");

        let e = StorageError::InvalidFile("bad magic".to_string());
        assert!(e.to_string().contains("bad magic"));
    }
}
