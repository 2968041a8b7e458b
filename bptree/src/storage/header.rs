//! File header record.
//!
//! The file header occupies block 0 and records the block size the file was
//! created with, so a reopened file is read with the same geometry.

// Block sizes are validated to fit in u32 before they reach this module.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::Block;
use crate::storage::io::StorageError;

/// Magic number identifying a block file: "BLKSTORE"
pub const MAGIC: [u8; 8] = *b"BLKSTORE";

/// Smallest block size a file may be created with.
pub const MIN_BLOCK_SIZE: u32 = 64;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const BLOCK_SIZE: usize = 8;
    pub const CHECKSUM: usize = 12;
}

/// Bytes covered by the header checksum.
const CHECKSUMMED_LEN: usize = offsets::CHECKSUM;

/// Total bytes of the header record.
pub const HEADER_LEN: usize = offsets::CHECKSUM + 4;

/// The file header written once at creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Block size in bytes.
    pub block_size: u32,
}

impl FileHeader {
    /// Create a header for a new file.
    pub const fn new(block_size: u32) -> Result<Self, StorageError> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(StorageError::InvalidBlockSize(block_size));
        }
        Ok(Self { block_size })
    }

    /// Serialize the header into a full block.
    #[must_use]
    pub fn to_block(self) -> Block {
        let mut block = Block::zeroed(self.block_size as usize);
        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u32(offsets::BLOCK_SIZE, self.block_size);
        let checksum = crc32fast::hash(block.read_bytes(0, CHECKSUMMED_LEN));
        block.write_u32(offsets::CHECKSUM, checksum);
        block
    }

    /// Parse the header from the first `HEADER_LEN` bytes of a file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::InvalidFile(format!(
                "header truncated: {} bytes",
                bytes.len()
            )));
        }

        if bytes[offsets::MAGIC..offsets::MAGIC + MAGIC.len()] != MAGIC {
            return Err(StorageError::InvalidFile("bad magic".to_string()));
        }

        let word = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };

        let expected = word(offsets::CHECKSUM);
        let actual = crc32fast::hash(&bytes[..CHECKSUMMED_LEN]);
        if expected != actual {
            return Err(StorageError::InvalidFile(format!(
                "header checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            )));
        }

        Self::new(word(offsets::BLOCK_SIZE))
    }
}
