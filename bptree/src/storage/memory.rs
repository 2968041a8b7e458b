//! In-memory block store.
//!
//! Holds every block in a `Vec`, mirroring the semantics of `BlockFile`:
//! writes past the end grow the store with zeroed blocks, reads past the end
//! are short reads, and a closed store rejects every call with `NotOpen`.

use crate::storage::block::{Block, BlockId, FILE_HEADER_BLOCK};
use crate::storage::header::FileHeader;
use crate::storage::io::{BlockStore, StorageError};

/// A block store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    blocks: Vec<Block>,
    block_size: usize,
    open: bool,
    /// Counters for tests that care about I/O volume.
    reads: u64,
    writes: u64,
}

impl MemoryStore {
    /// Create a store whose block 0 already holds a file header.
    pub fn new(block_size: u32) -> Result<Self, StorageError> {
        let header = FileHeader::new(block_size)?;
        let mut store = Self {
            blocks: Vec::new(),
            block_size: block_size as usize,
            open: true,
            reads: 0,
            writes: 0,
        };
        store.write_block(FILE_HEADER_BLOCK, &header.to_block())?;
        Ok(store)
    }

    /// Number of blocks in the store.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of block reads served so far.
    #[must_use]
    pub const fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of block writes performed so far.
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.writes
    }

    /// Close the store. Further operations fail with `NotOpen`.
    pub const fn close(&mut self) {
        self.open = false;
    }

    const fn ensure_open(&self) -> Result<(), StorageError> {
        if self.open {
            Ok(())
        } else {
            Err(StorageError::NotOpen)
        }
    }

    /// Copy `len` bytes starting at a byte offset, spanning blocks as needed.
    #[allow(clippy::cast_possible_truncation)]
    fn copy_out(&self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let total = self.blocks.len() as u64 * self.block_size as u64;
        let available = total.saturating_sub(offset).min(len as u64) as usize;
        if available < len {
            return Err(StorageError::ShortRead {
                offset,
                expected: len,
                actual: available,
            });
        }

        let mut out = Vec::with_capacity(len);
        let mut cursor = offset;
        while out.len() < len {
            let block = &self.blocks[(cursor / self.block_size as u64) as usize];
            let start = (cursor % self.block_size as u64) as usize;
            let take = (self.block_size - start).min(len - out.len());
            out.extend_from_slice(block.read_bytes(start, take));
            cursor += take as u64;
        }
        Ok(out)
    }
}

impl BlockStore for MemoryStore {
    fn is_open(&self) -> bool {
        self.open
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&mut self, id: BlockId) -> Result<Block, StorageError> {
        self.ensure_open()?;
        self.reads += 1;
        self.blocks
            .get(id as usize)
            .cloned()
            .ok_or(StorageError::ShortRead {
                offset: u64::from(id) * self.block_size as u64,
                expected: self.block_size,
                actual: 0,
            })
    }

    fn write_block(&mut self, id: BlockId, block: &Block) -> Result<(), StorageError> {
        self.ensure_open()?;
        debug_assert_eq!(block.len(), self.block_size);
        let index = id as usize;
        if index >= self.blocks.len() {
            self.blocks.resize(index + 1, Block::zeroed(self.block_size));
        }
        self.blocks[index] = block.clone();
        self.writes += 1;
        Ok(())
    }

    fn write_new_block(&mut self, block: &Block) -> Result<BlockId, StorageError> {
        self.ensure_open()?;
        let id = BlockId::try_from(self.blocks.len())
            .map_err(|_| StorageError::InvalidFile("store exceeds addressable blocks".into()))?;
        self.write_block(id, block)?;
        Ok(id)
    }

    fn read_u32(&mut self, offset: u64) -> Result<u32, StorageError> {
        self.ensure_open()?;
        let bytes = self.copy_out(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        self.ensure_open()?;
        self.copy_out(offset, len)
    }
}
