//! Tree metadata record.
//!
//! Block 1 records where the tree starts and where the free list starts. It is
//! rewritten whenever either moves, and it also pins the key format so a file
//! is never reopened with keys of a different shape.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{Block, BlockId, TREE_META_BLOCK, block_offset};
use crate::storage::btree::key::{KeyFormat, KeyKind};
use crate::storage::btree::tree::BTreeError;
use crate::storage::io::{BlockStore, StorageError};

/// Magic number identifying a tree metadata block: "BPTREEIX"
pub const MAGIC: [u8; 8] = *b"BPTREEIX";

/// Metadata field offsets within block 1.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const ROOT: usize = 8;
    pub const FREE_LIST_HEAD: usize = 12;
    pub const KEY_KIND: usize = 16;
    pub const KEY_WIDTH: usize = 20;
}

/// The tree metadata record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TreeMeta {
    /// Block holding the root node.
    pub root: BlockId,
    /// First block on the free list, 0 if the list is empty.
    pub free_list_head: BlockId,
    /// Key format the tree was created with.
    pub key_format: KeyFormat,
}

impl TreeMeta {
    /// Serialize the record into a full block.
    #[must_use]
    pub fn to_block(&self, block_size: usize) -> Block {
        let mut block = Block::zeroed(block_size);
        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u32(offsets::ROOT, self.root);
        block.write_u32(offsets::FREE_LIST_HEAD, self.free_list_head);
        block.write_u32(offsets::KEY_KIND, self.key_format.kind() as u32);
        block.write_u32(offsets::KEY_WIDTH, self.key_format.width() as u32);
        block
    }

    /// Persist the record to block 1.
    pub fn write<S: BlockStore>(&self, store: &mut S) -> Result<(), StorageError> {
        let block = self.to_block(store.block_size());
        store.write_block(TREE_META_BLOCK, &block)?;
        tracing::trace!(
            "wrote tree metadata: root={}, free_list_head={}",
            self.root,
            self.free_list_head
        );
        Ok(())
    }

    /// Load the record from block 1.
    ///
    /// Returns `None` when the store holds no tree yet, either because block 1
    /// does not exist or because it lacks the signature.
    pub fn read<S: BlockStore>(store: &mut S) -> Result<Option<Self>, BTreeError> {
        let base = block_offset(TREE_META_BLOCK, store.block_size());

        match store.read_bytes(base + offsets::MAGIC as u64, MAGIC.len()) {
            Ok(magic) if magic == MAGIC => {}
            Ok(_) | Err(StorageError::ShortRead { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let root = store.read_u32(base + offsets::ROOT as u64)?;
        let free_list_head = store.read_u32(base + offsets::FREE_LIST_HEAD as u64)?;
        let kind = store.read_u32(base + offsets::KEY_KIND as u64)?;
        let width = store.read_u32(base + offsets::KEY_WIDTH as u64)? as usize;

        let key_format = match KeyKind::try_from(kind) {
            Ok(KeyKind::Integer) => KeyFormat::integer(),
            Ok(KeyKind::String) => KeyFormat::string(width).map_err(|e| {
                BTreeError::Corrupt(format!("tree metadata has invalid key format: {e}"))
            })?,
            Err(tag) => {
                return Err(BTreeError::Corrupt(format!(
                    "tree metadata has unknown key kind {tag}"
                )));
            }
        };

        Ok(Some(Self {
            root,
            free_list_head,
            key_format,
        }))
    }
}
