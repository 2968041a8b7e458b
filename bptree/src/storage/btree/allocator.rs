//! Block allocator using a free list threaded through released blocks.
//!
//! Released blocks are rewritten as Empty nodes that link to the previous
//! head of the list. The head lives in the tree metadata record, which is
//! persisted before either operation returns since it is the only record of
//! the chain.

use crate::storage::block::{Block, BlockId};
use crate::storage::btree::node::{EmptyNode, Node, NodeError, NodeKind};
use crate::storage::btree::store::NodeStore;
use crate::storage::btree::tree::BTreeError;
use crate::storage::io::BlockStore;

impl<S: BlockStore> NodeStore<'_, S> {
    /// Hand out a block for a new node.
    ///
    /// Reuses the head of the free list when there is one, otherwise grows the
    /// store by one zero-filled block.
    pub(crate) fn allocate(&mut self) -> Result<BlockId, BTreeError> {
        let head = self.meta.free_list_head;
        if head == 0 {
            let id = self.store.write_new_block(&Block::zeroed(self.layout.block_size))?;
            tracing::trace!("allocated block {id} at end of store");
            return Ok(id);
        }

        let next = match self.read_node(head)? {
            Node::Empty(empty) => empty.next,
            other => {
                return Err(NodeError::UnexpectedKind {
                    block: head,
                    expected: NodeKind::Empty,
                    found: other.kind(),
                }
                .into());
            }
        };

        self.meta.free_list_head = next;
        self.write_meta()?;
        tracing::debug!("reused free block {head}, free list head now {next}");
        Ok(head)
    }

    /// Return a block to the free list.
    pub(crate) fn release(&mut self, id: BlockId) -> Result<(), BTreeError> {
        let empty = Node::Empty(EmptyNode {
            id,
            next: self.meta.free_list_head,
        });
        self.write_node(&empty)?;

        self.meta.free_list_head = id;
        self.write_meta()?;
        tracing::debug!("released block {id} to the free list");
        Ok(())
    }
}
