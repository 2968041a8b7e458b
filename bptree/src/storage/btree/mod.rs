//! Disk-resident B+ tree index.
//!
//! Maps fixed-width keys to record locators. Every node occupies one block of
//! a [`BlockStore`](crate::storage::io::BlockStore):
//! - Leaf nodes hold keys with their locators and link to the next leaf
//! - Internal nodes hold separator keys and child block positions
//! - Released blocks form a free list that is drained before the store grows
//!
//! Block 1 holds the tree metadata (root position, free-list head, key format).
//!
//! # Usage
//!
//! ```
//! use bptree::storage::MemoryStore;
//! use bptree::storage::btree::{BPlusTree, KeyFormat, Locator};
//!
//! let mut store = MemoryStore::new(4096).expect("store");
//! let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");
//!
//! assert!(tree.insert(42, Locator::new(7, 3)).expect("insert"));
//! assert_eq!(tree.query(42).expect("query"), Some(Locator::new(7, 3)));
//! assert!(tree.remove(42).expect("remove"));
//! ```

mod allocator;
mod key;
mod meta;
mod node;
mod store;
mod tree;
mod verify;

pub use key::{IndexKey, KeyArray, KeyError, KeyFormat, KeyKind, Position};
pub use meta::TreeMeta;
pub use node::{
    EmptyNode, InternalNode, Layout, LeafNode, Locator, Node, NodeError, NodeKind,
};
pub use tree::{BPlusTree, BTreeError};
pub use verify::TreeStats;
