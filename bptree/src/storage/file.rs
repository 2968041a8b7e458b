//! File-backed block store.
//!
//! This module handles reading and writing blocks to the index file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{Block, BlockId, FILE_HEADER_BLOCK, block_offset};
use crate::storage::header::{FileHeader, HEADER_LEN};
use crate::storage::io::{BlockStore, StorageError};

/// A block file handle with low-level block I/O operations.
#[derive(Debug)]
pub struct BlockFile {
    file: Option<File>,
    path: PathBuf,
    block_size: usize,
}

impl BlockFile {
    /// Create a block file at the given path, truncating anything already there.
    ///
    /// Writes the file header to block 0.
    pub fn create(path: &Path, block_size: u32) -> Result<Self, StorageError> {
        let header = FileHeader::new(block_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| StorageError::InvalidFileName {
                path: path.to_path_buf(),
                source,
            })?;

        let mut this = Self {
            file: Some(file),
            path: path.to_path_buf(),
            block_size: block_size as usize,
        };
        this.write_block(FILE_HEADER_BLOCK, &header.to_block())?;

        tracing::info!(
            "Created block file {} with block size {block_size}",
            path.display()
        );
        Ok(this)
    }

    /// Open an existing block file and validate its header.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| StorageError::InvalidFileName {
                path: path.to_path_buf(),
                source,
            })?;

        let mut this = Self {
            file: Some(file),
            path: path.to_path_buf(),
            block_size: 0,
        };

        let bytes = match this.read_at(0, HEADER_LEN) {
            Ok(bytes) => bytes,
            Err(StorageError::ShortRead { actual, .. }) => {
                return Err(StorageError::InvalidFile(format!(
                    "header truncated: {actual} bytes"
                )));
            }
            Err(e) => return Err(e),
        };
        let header = FileHeader::from_bytes(&bytes)?;
        this.block_size = header.block_size as usize;

        tracing::info!(
            "Opened block file {} with block size {}",
            path.display(),
            header.block_size
        );
        Ok(this)
    }

    /// Open the file if it is a valid block file, otherwise create it.
    ///
    /// An existing valid file keeps its own block size.
    pub fn open_or_create(path: &Path, block_size: u32) -> Result<Self, StorageError> {
        match Self::open(path) {
            Ok(file) => {
                if file.block_size != block_size as usize {
                    tracing::warn!(
                        "{} uses block size {}, ignoring requested {block_size}",
                        path.display(),
                        file.block_size
                    );
                }
                Ok(file)
            }
            Err(e @ (StorageError::InvalidFile(_) | StorageError::InvalidFileName { .. })) => {
                tracing::debug!("Cannot open {} ({e}), creating it", path.display());
                Self::create(path, block_size)
            }
            Err(e) => Err(e),
        }
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush all written blocks to durable storage.
    pub fn sync(&self) -> Result<(), StorageError> {
        let file = self.file.as_ref().ok_or(StorageError::NotOpen)?;
        file.sync_all()?;
        Ok(())
    }

    /// Close the file. Further operations fail with `NotOpen`.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!("Closed block file {}", self.path.display());
        }
    }

    /// Number of blocks currently in the file, counting a partial trailing block.
    pub fn block_count(&self) -> Result<u64, StorageError> {
        let file = self.file.as_ref().ok_or(StorageError::NotOpen)?;
        let len = file.metadata()?.len();
        Ok(len.div_ceil(self.block_size as u64))
    }

    fn file_mut(&mut self) -> Result<&mut File, StorageError> {
        self.file.as_mut().ok_or(StorageError::NotOpen)
    }

    /// Read exactly `len` bytes at `offset`, reporting how many were available on EOF.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(len);
        Read::by_ref(file).take(len as u64).read_to_end(&mut buf)?;

        if buf.len() < len {
            return Err(StorageError::ShortRead {
                offset,
                expected: len,
                actual: buf.len(),
            });
        }
        Ok(buf)
    }

    fn to_block_id(&self, offset: u64) -> Result<BlockId, StorageError> {
        BlockId::try_from(offset / self.block_size as u64).map_err(|_| {
            StorageError::InvalidFile(format!("offset {offset} exceeds addressable blocks"))
        })
    }
}

impl BlockStore for BlockFile {
    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&mut self, id: BlockId) -> Result<Block, StorageError> {
        let offset = block_offset(id, self.block_size);
        let bytes = self.read_at(offset, self.block_size)?;
        tracing::trace!("read block {id}");
        Ok(Block::from_vec(bytes))
    }

    fn write_block(&mut self, id: BlockId, block: &Block) -> Result<(), StorageError> {
        debug_assert_eq!(block.len(), self.block_size);
        let offset = block_offset(id, self.block_size);
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(block.as_bytes())?;
        tracing::trace!("wrote block {id}");
        Ok(())
    }

    fn write_new_block(&mut self, block: &Block) -> Result<BlockId, StorageError> {
        let end = self.file_mut()?.seek(SeekFrom::End(0))?;
        let block_size = self.block_size as u64;
        let id = self.to_block_id(end.div_ceil(block_size) * block_size)?;
        self.write_block(id, block)?;
        Ok(id)
    }

    fn read_u32(&mut self, offset: u64) -> Result<u32, StorageError> {
        let bytes = self.read_at(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        self.read_at(offset, len)
    }
}
