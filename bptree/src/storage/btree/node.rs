//! B+ tree node types and serialization.
//!
//! Every block of the tree is one of three kinds, tagged by its first word:
//! - Empty blocks sit on the free list and only link to the next free block
//! - Leaf nodes hold keys with their record locators, linked to the next leaf
//! - Internal nodes hold separator keys and child block positions
//!
//! Layouts are fixed arrays sized by the tree's capacities, so the position
//! of every field depends only on the block size and key width:
//!
//! ```text
//! Empty:    tag | next
//! Leaf:     tag | size | next | page[leaf_cap] | slot[leaf_cap] | keys[leaf_cap]
//! Internal: tag | size | child[internal_cap + 1] | keys[internal_cap]
//! ```

// Entry counts are bounded by the block size, which fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{Block, BlockId, WORD_SIZE};
use crate::storage::btree::key::KeyArray;

/// Capacities derived from the block size and key width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub block_size: usize,
    pub key_width: usize,
    /// Maximum keys in a leaf between operations.
    pub leaf_capacity: usize,
    /// Maximum keys in an internal node between operations.
    pub internal_capacity: usize,
}

impl Layout {
    /// Fixed words in every node: tag, size and either `next` or the extra child.
    const OVERHEAD: usize = 3 * WORD_SIZE;

    #[must_use]
    pub const fn new(block_size: usize, key_width: usize) -> Self {
        let usable = block_size.saturating_sub(Self::OVERHEAD);
        Self {
            block_size,
            key_width,
            leaf_capacity: usable / (key_width + 2 * WORD_SIZE),
            internal_capacity: usable / (WORD_SIZE + key_width),
        }
    }

    /// Whether two leaves with these sizes fit in one block.
    #[must_use]
    pub const fn leaves_fit(&self, left: usize, right: usize) -> bool {
        left + right <= self.leaf_capacity
    }

    /// Whether two internal nodes plus their separator fit in one block.
    #[must_use]
    pub const fn internals_fit(&self, left: usize, right: usize) -> bool {
        left + right < self.internal_capacity
    }
}

/// Where a record lives in external storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub page: u32,
    pub slot: u32,
}

impl Locator {
    #[must_use]
    pub const fn new(page: u32, slot: u32) -> Self {
        Self { page, slot }
    }
}

/// Node kind discriminant stored in the first word of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeKind {
    Empty = 0,
    Leaf = 1,
    Internal = 2,
}

impl TryFrom<u32> for NodeKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Internal),
            _ => Err(value),
        }
    }
}

/// A block on the free list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyNode {
    pub id: BlockId,
    /// Next free block, 0 if this is the last one.
    pub next: BlockId,
}

/// A leaf node.
///
/// `keys` and `locators` are parallel arrays sorted by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub id: BlockId,
    /// Right sibling leaf, 0 if none.
    pub next: BlockId,
    pub keys: KeyArray,
    pub locators: Vec<Locator>,
}

/// An internal node.
///
/// Stores N keys and N+1 child pointers.
/// `children[i]` holds keys < `keys[i]`,
/// `children[i+1]` holds keys >= `keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub id: BlockId,
    pub keys: KeyArray,
    pub children: Vec<BlockId>,
}

/// A decoded tree block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Empty(EmptyNode),
    Leaf(LeafNode),
    Internal(InternalNode),
}

mod leaf_offsets {
    pub const SIZE: usize = 4;
    pub const NEXT: usize = 8;
    pub const PAGES: usize = 12;
}

mod internal_offsets {
    pub const SIZE: usize = 4;
    pub const CHILDREN: usize = 8;
}

const EMPTY_NEXT: usize = 4;

impl Node {
    /// Position of the block this node lives in.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        match self {
            Self::Empty(n) => n.id,
            Self::Leaf(n) => n.id,
            Self::Internal(n) => n.id,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Empty(_) => NodeKind::Empty,
            Self::Leaf(_) => NodeKind::Leaf,
            Self::Internal(_) => NodeKind::Internal,
        }
    }

    /// Number of keys held by the node.
    #[must_use]
    pub(crate) const fn len(&self) -> usize {
        match self {
            Self::Empty(_) => 0,
            Self::Leaf(n) => n.keys.len(),
            Self::Internal(n) => n.keys.len(),
        }
    }

    /// Whether the node holds more keys than a block can store.
    #[must_use]
    pub const fn is_overfull(&self, layout: &Layout) -> bool {
        match self {
            Self::Empty(_) => false,
            Self::Leaf(n) => n.keys.len() > layout.leaf_capacity,
            Self::Internal(n) => n.keys.len() > layout.internal_capacity,
        }
    }

    /// Serialize the node into a block of `layout.block_size` bytes.
    #[must_use]
    pub fn encode(&self, layout: &Layout) -> Block {
        let mut block = Block::zeroed(layout.block_size);
        block.write_u32(0, self.kind() as u32);

        match self {
            Self::Empty(n) => block.write_u32(EMPTY_NEXT, n.next),
            Self::Leaf(n) => {
                debug_assert!(n.keys.len() <= layout.leaf_capacity);
                let cap = layout.leaf_capacity;
                let slots = leaf_offsets::PAGES + cap * WORD_SIZE;
                let keys = slots + cap * WORD_SIZE;

                block.write_u32(leaf_offsets::SIZE, n.keys.len() as u32);
                block.write_u32(leaf_offsets::NEXT, n.next);
                for (i, locator) in n.locators.iter().enumerate() {
                    block.write_u32(leaf_offsets::PAGES + i * WORD_SIZE, locator.page);
                    block.write_u32(slots + i * WORD_SIZE, locator.slot);
                }
                block.write_bytes(keys, n.keys.as_packed());
            }
            Self::Internal(n) => {
                debug_assert!(n.keys.len() <= layout.internal_capacity);
                let keys = internal_offsets::CHILDREN + (layout.internal_capacity + 1) * WORD_SIZE;

                block.write_u32(internal_offsets::SIZE, n.keys.len() as u32);
                for (i, &child) in n.children.iter().enumerate() {
                    block.write_u32(internal_offsets::CHILDREN + i * WORD_SIZE, child);
                }
                block.write_bytes(keys, n.keys.as_packed());
            }
        }

        block
    }

    /// Deserialize the node stored at block `id`.
    ///
    /// Arrays are sized from the layout's capacities, with one spare slot for
    /// the transient overflow of an insert.
    pub fn decode(id: BlockId, block: &Block, layout: &Layout) -> Result<Self, NodeError> {
        let tag = block.read_u32(0);
        let kind = NodeKind::try_from(tag).map_err(|tag| NodeError::UnknownKind { block: id, tag })?;
        let width = layout.key_width;

        match kind {
            NodeKind::Empty => Ok(Self::Empty(EmptyNode {
                id,
                next: block.read_u32(EMPTY_NEXT),
            })),
            NodeKind::Leaf => {
                let cap = layout.leaf_capacity;
                let size = checked_size(id, block.read_u32(leaf_offsets::SIZE), cap)?;
                let slots = leaf_offsets::PAGES + cap * WORD_SIZE;
                let keys = slots + cap * WORD_SIZE;

                let mut locators = Vec::with_capacity(cap + 1);
                for i in 0..size {
                    locators.push(Locator {
                        page: block.read_u32(leaf_offsets::PAGES + i * WORD_SIZE),
                        slot: block.read_u32(slots + i * WORD_SIZE),
                    });
                }

                Ok(Self::Leaf(LeafNode {
                    id,
                    next: block.read_u32(leaf_offsets::NEXT),
                    keys: KeyArray::from_packed(width, block.read_bytes(keys, size * width), cap + 1),
                    locators,
                }))
            }
            NodeKind::Internal => {
                let cap = layout.internal_capacity;
                let size = checked_size(id, block.read_u32(internal_offsets::SIZE), cap)?;
                let keys = internal_offsets::CHILDREN + (cap + 1) * WORD_SIZE;

                let mut children = Vec::with_capacity(cap + 2);
                for i in 0..=size {
                    children.push(block.read_u32(internal_offsets::CHILDREN + i * WORD_SIZE));
                }

                Ok(Self::Internal(InternalNode {
                    id,
                    keys: KeyArray::from_packed(width, block.read_bytes(keys, size * width), cap + 1),
                    children,
                }))
            }
        }
    }
}

fn checked_size(block: BlockId, size: u32, capacity: usize) -> Result<usize, NodeError> {
    let size = size as usize;
    if size > capacity {
        return Err(NodeError::SizeOutOfRange {
            block,
            size,
            capacity,
        });
    }
    Ok(size)
}

impl LeafNode {
    /// Create a new empty leaf node.
    #[must_use]
    pub fn new(id: BlockId, layout: &Layout) -> Self {
        Self {
            id,
            next: 0,
            keys: KeyArray::with_capacity(layout.key_width, layout.leaf_capacity + 1),
            locators: Vec::with_capacity(layout.leaf_capacity + 1),
        }
    }

    /// Insert an entry before position `index`.
    pub fn insert_at(&mut self, index: usize, key: &[u8], locator: Locator) {
        self.keys.insert(index, key);
        self.locators.insert(index, locator);
    }

    /// Remove the entry at `index`.
    pub fn remove_at(&mut self, index: usize) {
        self.keys.remove(index);
        self.locators.remove(index);
    }

    /// Split the node, returning the new right node stored at `right_id`.
    ///
    /// The right node takes the upper half and takes over this node's place in
    /// the leaf chain. Its first key is the separator for the parent.
    #[must_use]
    pub fn split(&mut self, right_id: BlockId, layout: &Layout) -> Self {
        let mid = self.keys.len() / 2;
        let cap = layout.leaf_capacity + 1;

        let mut locators = Vec::with_capacity(cap);
        locators.extend(self.locators.drain(mid..));

        let right = Self {
            id: right_id,
            next: self.next,
            keys: self.keys.split_off(mid, cap),
            locators,
        };
        self.next = right_id;
        right
    }

    /// Absorb the right sibling's entries and its place in the leaf chain.
    pub fn merge(&mut self, right: Self) {
        self.keys.append(&right.keys);
        self.locators.extend(right.locators);
        self.next = right.next;
    }
}

impl InternalNode {
    /// Create a root with two children split around `separator`.
    #[must_use]
    pub fn with_children(
        id: BlockId,
        left_child: BlockId,
        separator: &[u8],
        right_child: BlockId,
        layout: &Layout,
    ) -> Self {
        let mut keys = KeyArray::with_capacity(layout.key_width, layout.internal_capacity + 1);
        keys.push(separator);
        let mut children = Vec::with_capacity(layout.internal_capacity + 2);
        children.extend([left_child, right_child]);
        Self { id, keys, children }
    }

    /// Insert `separator` at `index` with `child` directly to its right.
    pub fn insert_child(&mut self, index: usize, separator: &[u8], child: BlockId) {
        self.keys.insert(index, separator);
        self.children.insert(index + 1, child);
    }

    /// Remove the child at `index` (which must be at least 1) and the key before it.
    pub fn remove_child(&mut self, index: usize) {
        debug_assert!(index > 0);
        self.children.remove(index);
        self.keys.remove(index - 1);
    }

    /// Split the node, returning the promoted middle key and the new right node.
    ///
    /// The middle key ends up in neither half.
    #[must_use]
    pub fn split(&mut self, right_id: BlockId, layout: &Layout) -> (Vec<u8>, Self) {
        let mid = self.keys.len() / 2;
        let cap = layout.internal_capacity + 1;

        let right_keys = self.keys.split_off(mid + 1, cap);
        let mut right_children = Vec::with_capacity(cap + 1);
        right_children.extend(self.children.drain(mid + 1..));

        // The middle key is now the last key on the left
        let separator = self.keys.pop().unwrap_or_default();

        let right = Self {
            id: right_id,
            keys: right_keys,
            children: right_children,
        };
        (separator, right)
    }

    /// Absorb the right sibling, with `separator` placed between the two key runs.
    pub fn merge(&mut self, separator: &[u8], right: Self) {
        self.keys.push(separator);
        self.keys.append(&right.keys);
        self.children.extend(right.children);
    }
}

/// Errors that can occur when decoding tree blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The kind tag is not one this tree writes.
    UnknownKind { block: BlockId, tag: u32 },
    /// The stored entry count exceeds the capacity of the kind.
    SizeOutOfRange {
        block: BlockId,
        size: usize,
        capacity: usize,
    },
    /// The block holds a different kind than the operation requires.
    UnexpectedKind {
        block: BlockId,
        expected: NodeKind,
        found: NodeKind,
    },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKind { block, tag } => {
                write!(f, "block {block}: unknown node kind {tag}")
            }
            Self::SizeOutOfRange {
                block,
                size,
                capacity,
            } => write!(f, "block {block}: size {size} exceeds capacity {capacity}"),
            Self::UnexpectedKind {
                block,
                expected,
                found,
            } => write!(f, "block {block}: expected {expected:?} node, found {found:?}"),
        }
    }
}

impl std::error::Error for NodeError {}
