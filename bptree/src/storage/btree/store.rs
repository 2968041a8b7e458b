//! Typed node I/O on top of a block store.
//!
//! `NodeStore` owns the tree's view of the file: the capacities every block is
//! decoded with and the metadata record that must be rewritten whenever the
//! root or the free-list head moves.

use crate::storage::block::BlockId;
use crate::storage::btree::meta::TreeMeta;
use crate::storage::btree::node::{Layout, Node, NodeError, NodeKind};
use crate::storage::btree::tree::BTreeError;
use crate::storage::io::BlockStore;

/// Node-level access to the blocks of one tree.
pub(crate) struct NodeStore<'a, S: BlockStore> {
    pub(crate) store: &'a mut S,
    pub(crate) layout: Layout,
    pub(crate) meta: TreeMeta,
}

impl<'a, S: BlockStore> NodeStore<'a, S> {
    pub(crate) const fn new(store: &'a mut S, layout: Layout, meta: TreeMeta) -> Self {
        Self {
            store,
            layout,
            meta,
        }
    }

    /// Load and decode the block at `id`.
    pub(crate) fn read_node(&mut self, id: BlockId) -> Result<Node, BTreeError> {
        let block = self.store.read_block(id)?;
        Ok(Node::decode(id, &block, &self.layout)?)
    }

    /// Load a block that must hold a tree node (leaf or internal).
    pub(crate) fn read_tree_node(&mut self, id: BlockId) -> Result<Node, BTreeError> {
        let node = self.read_node(id)?;
        if let Node::Empty(_) = node {
            return Err(NodeError::UnexpectedKind {
                block: id,
                expected: NodeKind::Leaf,
                found: NodeKind::Empty,
            }
            .into());
        }
        Ok(node)
    }

    /// Encode and write a node back to its block.
    pub(crate) fn write_node(&mut self, node: &Node) -> Result<(), BTreeError> {
        let block = node.encode(&self.layout);
        self.store.write_block(node.id(), &block)?;
        Ok(())
    }

    /// Persist the metadata record.
    pub(crate) fn write_meta(&mut self) -> Result<(), BTreeError> {
        self.meta.write(self.store)?;
        Ok(())
    }

    /// Point the metadata at a new root and persist it.
    pub(crate) fn set_root(&mut self, root: BlockId) -> Result<(), BTreeError> {
        self.meta.root = root;
        self.write_meta()
    }
}
