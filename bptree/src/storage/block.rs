//! Raw block buffers.
//!
//! A block is the unit of I/O between the tree and its block store. Unlike a
//! fixed-size page, the block size is chosen when the backing file is created
//! and recorded in the file header, so buffers are sized at runtime.

/// Width in bytes of one stored integer (position, count or locator field).
pub const WORD_SIZE: usize = 4;

/// A block position (0-indexed block number).
///
/// Position 0 holds the file header and position 1 the tree metadata, so a
/// stored position of 0 can double as "none" inside tree blocks.
pub type BlockId = u32;

/// Block holding the file header record.
pub const FILE_HEADER_BLOCK: BlockId = 0;

/// Block holding the tree metadata record.
pub const TREE_META_BLOCK: BlockId = 1;

/// Byte offset of a block inside the backing file.
#[must_use]
pub fn block_offset(id: BlockId, block_size: usize) -> u64 {
    u64::from(id) * block_size as u64
}

/// A raw block buffer of exactly `block_size` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8]>,
}

impl Block {
    /// Create a zero-filled block.
    #[must_use]
    pub fn zeroed(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size].into_boxed_slice(),
        }
    }

    /// Wrap bytes read from storage.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Size of the block in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block has no bytes at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw block data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.data.len().min(16);
        f.debug_struct("Block")
            .field("len", &self.data.len())
            .field("first_bytes", &&self.data[..shown])
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_read_write() {
        let mut block = Block::zeroed(128);

        block.write_u32(0, 0x1234_5678);
        assert_eq!(block.read_u32(0), 0x1234_5678);
        assert_eq!(block.read_bytes(0, 4), &[0x78, 0x56, 0x34, 0x12]);

        block.write_bytes(100, b"hello");
        assert_eq!(block.read_bytes(100, 5), b"hello");
        assert_eq!(block.len(), 128);
    }

    #[test]
    fn test_block_offset() {
        assert_eq!(block_offset(0, 4096), 0);
        assert_eq!(block_offset(3, 4096), 12288);
        assert_eq!(block_offset(BlockId::MAX, 4096), u64::from(u32::MAX) * 4096);
    }
}
