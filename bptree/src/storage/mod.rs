//! Block storage and the B+ tree index built on it.
//!
//! # File Format
//!
//! An index lives in a single file of fixed-size blocks:
//!
//! - Block 0: File header (signature, block size, checksum)
//! - Block 1: Tree metadata (root position, free-list head, key format)
//! - Remaining blocks: tree nodes and free blocks
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::BlockFile;
//! use bptree::storage::btree::{BPlusTree, KeyFormat, Locator};
//!
//! // Open the index, creating it on first use
//! let mut file = BlockFile::open_or_create(path, 4096)?;
//! let mut tree = BPlusTree::open(&mut file, KeyFormat::string(20)?)?;
//!
//! tree.insert("customer-000000000042", Locator::new(12, 3))?;
//! let found = tree.query("customer-000000000042")?;
//!
//! // Sync to disk
//! file.sync()?;
//! ```

mod block;
pub mod btree;
mod file;
mod header;
mod io;
mod memory;

pub use block::{Block, BlockId, FILE_HEADER_BLOCK, TREE_META_BLOCK, WORD_SIZE, block_offset};
pub use file::BlockFile;
pub use header::{FileHeader, MIN_BLOCK_SIZE};
pub use io::{BlockStore, StorageError};
pub use memory::MemoryStore;
