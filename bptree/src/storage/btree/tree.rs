//! B+ tree engine.
//!
//! The root node stays resident for the lifetime of the tree; every other node
//! is read into the call frame that visits it and written back before that
//! frame returns. Insertion and removal recurse from the root to a leaf and
//! repair the structure on the way back up:
//! - an overfull child is split and its new sibling registered in the parent
//! - after a removal the child is merged with a neighbour whenever the two
//!   fit in one block, left neighbour first

use crate::storage::block::BlockId;
use crate::storage::btree::key::{IndexKey, KeyError, KeyFormat};
use crate::storage::btree::meta::TreeMeta;
use crate::storage::btree::node::{
    InternalNode, Layout, LeafNode, Locator, Node, NodeError, NodeKind,
};
use crate::storage::btree::store::NodeStore;
use crate::storage::io::{BlockStore, StorageError};

/// Smallest capacity that still lets a split leave both halves non-empty.
const MIN_CAPACITY: usize = 2;

/// A B+ tree index stored in the blocks of a [`BlockStore`].
pub struct BPlusTree<'a, S: BlockStore> {
    pub(super) nodes: NodeStore<'a, S>,
    pub(super) root: Node,
}

impl<'a, S: BlockStore> BPlusTree<'a, S> {
    /// Open the tree stored in `store`, creating an empty one if the store
    /// holds no tree yet.
    ///
    /// An existing tree must have been created with the same key format.
    pub fn open(store: &'a mut S, key_format: KeyFormat) -> Result<Self, BTreeError> {
        if !store.is_open() {
            return Err(StorageError::NotOpen.into());
        }

        let layout = Layout::new(store.block_size(), key_format.width());
        if layout.leaf_capacity < MIN_CAPACITY || layout.internal_capacity < MIN_CAPACITY {
            return Err(BTreeError::BlockTooSmall {
                block_size: layout.block_size,
                key_width: layout.key_width,
            });
        }

        if let Some(meta) = TreeMeta::read(store)? {
            if meta.key_format != key_format {
                return Err(BTreeError::FormatMismatch {
                    expected: key_format,
                    found: meta.key_format,
                });
            }

            let mut nodes = NodeStore::new(store, layout, meta);
            let root = nodes.read_tree_node(meta.root)?;
            tracing::info!(
                "opened tree: root={}, free_list_head={}, leaf_capacity={}, internal_capacity={}",
                meta.root,
                meta.free_list_head,
                layout.leaf_capacity,
                layout.internal_capacity
            );
            return Ok(Self { nodes, root });
        }

        let meta = TreeMeta {
            root: 0,
            free_list_head: 0,
            key_format,
        };
        let mut nodes = NodeStore::new(store, layout, meta);
        // Block 1 has to exist before the root can be appended after it
        nodes.write_meta()?;

        let id = nodes.allocate()?;
        let root = Node::Leaf(LeafNode::new(id, &layout));
        nodes.write_node(&root)?;
        nodes.set_root(id)?;
        tracing::info!(
            "initialized empty tree: root={id}, leaf_capacity={}, internal_capacity={}",
            layout.leaf_capacity,
            layout.internal_capacity
        );

        Ok(Self { nodes, root })
    }

    /// Insert a key with the locator of its record.
    ///
    /// Returns `false` and leaves the tree untouched if the key is already
    /// present; the first locator stored for a key is kept.
    pub fn insert<'k>(
        &mut self,
        key: impl Into<IndexKey<'k>>,
        locator: Locator,
    ) -> Result<bool, BTreeError> {
        let key = self.nodes.meta.key_format.encode(key.into())?;
        let inserted = self.nodes.insert_into(&mut self.root, &key, locator)?;

        if self.root.is_overfull(&self.nodes.layout) {
            let old_root = self.root.id();
            let (separator, sibling) = self.nodes.split(&mut self.root)?;

            let id = self.nodes.allocate()?;
            let root = Node::Internal(InternalNode::with_children(
                id,
                old_root,
                &separator,
                sibling,
                &self.nodes.layout,
            ));
            self.nodes.write_node(&root)?;
            self.nodes.set_root(id)?;
            self.root = root;
            tracing::debug!("root split: new root {id} over {old_root} and {sibling}");
        }

        Ok(inserted)
    }

    /// Look up the locator stored for a key.
    pub fn query<'k>(
        &mut self,
        key: impl Into<IndexKey<'k>>,
    ) -> Result<Option<Locator>, BTreeError> {
        let format = self.nodes.meta.key_format;
        let key = format.encode(key.into())?;

        let mut step = Step::towards(&self.root, &format, &key)?;
        loop {
            match step {
                Step::Found(locator) => return Ok(locator),
                Step::Descend(child) => {
                    let node = self.nodes.read_tree_node(child)?;
                    step = Step::towards(&node, &format, &key)?;
                }
            }
        }
    }

    /// Remove a key.
    ///
    /// Returns `false` if the key was not present.
    pub fn remove<'k>(&mut self, key: impl Into<IndexKey<'k>>) -> Result<bool, BTreeError> {
        let key = self.nodes.meta.key_format.encode(key.into())?;
        if !self.nodes.remove_from(&mut self.root, &key)? {
            return Ok(false);
        }

        let lone_child = match &self.root {
            Node::Internal(root) if root.keys.is_empty() => Some(root.children[0]),
            _ => None,
        };

        match lone_child {
            Some(child) => {
                let old_root = self.root.id();
                self.root = self.nodes.read_tree_node(child)?;
                self.nodes.set_root(child)?;
                self.nodes.release(old_root)?;
                tracing::debug!("root collapsed: {old_root} replaced by its only child {child}");
            }
            None => self.nodes.write_node(&self.root)?,
        }

        Ok(true)
    }

    /// Block holding the root node.
    #[must_use]
    pub const fn root_position(&self) -> BlockId {
        self.nodes.meta.root
    }

    /// First block on the free list, 0 when it is empty.
    #[must_use]
    pub const fn free_list_head(&self) -> BlockId {
        self.nodes.meta.free_list_head
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.nodes.layout
    }

    #[must_use]
    pub const fn key_format(&self) -> KeyFormat {
        self.nodes.meta.key_format
    }

    /// Number of levels from the root down to the leaves.
    pub fn height(&mut self) -> Result<usize, BTreeError> {
        let mut height = 1;
        let mut next = match &self.root {
            Node::Internal(root) => Some(root.children[0]),
            _ => None,
        };
        while let Some(id) = next {
            height += 1;
            next = match self.nodes.read_tree_node(id)? {
                Node::Internal(node) => Some(node.children[0]),
                _ => None,
            };
        }
        Ok(height)
    }
}

/// One step of a lookup descent.
enum Step {
    Found(Option<Locator>),
    Descend(BlockId),
}

impl Step {
    fn towards(node: &Node, format: &KeyFormat, key: &[u8]) -> Result<Self, NodeError> {
        match node {
            Node::Leaf(leaf) => {
                let pos = leaf.keys.locate(format, key);
                Ok(Self::Found(pos.exact.then(|| leaf.locators[pos.index - 1])))
            }
            Node::Internal(internal) => {
                let pos = internal.keys.locate(format, key);
                Ok(Self::Descend(internal.children[pos.index]))
            }
            Node::Empty(empty) => Err(not_a_tree_node(empty.id)),
        }
    }
}

const fn not_a_tree_node(block: BlockId) -> NodeError {
    NodeError::UnexpectedKind {
        block,
        expected: NodeKind::Leaf,
        found: NodeKind::Empty,
    }
}

impl<S: BlockStore> NodeStore<'_, S> {
    /// Insert into the subtree rooted at `node`.
    ///
    /// `node` is written back when it changed, unless it is now overfull; an
    /// overfull node is written by whoever splits it.
    fn insert_into(
        &mut self,
        node: &mut Node,
        key: &[u8],
        locator: Locator,
    ) -> Result<bool, BTreeError> {
        let format = self.meta.key_format;
        let mut changed = false;

        let inserted = match node {
            Node::Leaf(leaf) => {
                let pos = leaf.keys.locate(&format, key);
                if pos.exact {
                    false
                } else {
                    leaf.insert_at(pos.index, key, locator);
                    changed = true;
                    true
                }
            }
            Node::Internal(parent) => {
                let index = parent.keys.locate(&format, key).index;
                let mut child = self.read_tree_node(parent.children[index])?;
                let inserted = self.insert_into(&mut child, key, locator)?;

                if child.is_overfull(&self.layout) {
                    let (separator, sibling) = self.split(&mut child)?;
                    parent.insert_child(index, &separator, sibling);
                    changed = true;
                }
                inserted
            }
            Node::Empty(empty) => return Err(not_a_tree_node(empty.id).into()),
        };

        if changed && !node.is_overfull(&self.layout) {
            self.write_node(node)?;
        }
        Ok(inserted)
    }

    /// Split an overfull node into a freshly allocated right sibling.
    ///
    /// Writes both halves and returns the separator for the parent together
    /// with the sibling's position.
    fn split(&mut self, node: &mut Node) -> Result<(Vec<u8>, BlockId), BTreeError> {
        let right_id = self.allocate()?;
        let (separator, right) = match node {
            Node::Leaf(leaf) => {
                let right = leaf.split(right_id, &self.layout);
                (right.keys.get(0).to_vec(), Node::Leaf(right))
            }
            Node::Internal(internal) => {
                let (separator, right) = internal.split(right_id, &self.layout);
                (separator, Node::Internal(right))
            }
            Node::Empty(empty) => return Err(not_a_tree_node(empty.id).into()),
        };

        self.write_node(node)?;
        self.write_node(&right)?;
        tracing::debug!(
            "split {:?} block {} into {} at {}",
            node.kind(),
            node.id(),
            right_id,
            self.meta.key_format.display(&separator)
        );
        Ok((separator, right_id))
    }

    /// Remove `key` from the subtree rooted at `node`.
    ///
    /// Children are written back here; `node` itself is left for the caller,
    /// which may still merge it with a neighbour.
    fn remove_from(&mut self, node: &mut Node, key: &[u8]) -> Result<bool, BTreeError> {
        let format = self.meta.key_format;
        match node {
            Node::Leaf(leaf) => {
                let pos = leaf.keys.locate(&format, key);
                if !pos.exact {
                    return Ok(false);
                }
                leaf.remove_at(pos.index - 1);
                Ok(true)
            }
            Node::Internal(parent) => {
                let index = parent.keys.locate(&format, key).index;
                let mut child = self.read_tree_node(parent.children[index])?;
                if !self.remove_from(&mut child, key)? {
                    return Ok(false);
                }
                self.merge_around(parent, index, child)?;
                Ok(true)
            }
            Node::Empty(empty) => Err(not_a_tree_node(empty.id).into()),
        }
    }

    /// Merge the child at `index` of `parent` with a neighbour if the pair
    /// fits in one block, trying the left neighbour first.
    ///
    /// The surviving node is written, the absorbed block released and its
    /// entry dropped from `parent`. Without a merge the child is written as is.
    fn merge_around(
        &mut self,
        parent: &mut InternalNode,
        index: usize,
        mut child: Node,
    ) -> Result<(), BTreeError> {
        if index > 0 {
            let mut left = self.read_tree_node(parent.children[index - 1])?;
            if self.fits(&left, &child) {
                let separator = parent.keys.get(index - 1).to_vec();
                self.absorb(&mut left, &separator, child)?;
                parent.remove_child(index);
                return Ok(());
            }
        }

        if index + 1 < parent.children.len() {
            let right = self.read_tree_node(parent.children[index + 1])?;
            if self.fits(&child, &right) {
                let separator = parent.keys.get(index).to_vec();
                self.absorb(&mut child, &separator, right)?;
                parent.remove_child(index + 1);
                return Ok(());
            }
        }

        self.write_node(&child)
    }

    const fn fits(&self, left: &Node, right: &Node) -> bool {
        match (left, right) {
            (Node::Leaf(_), Node::Leaf(_)) => self.layout.leaves_fit(left.len(), right.len()),
            (Node::Internal(_), Node::Internal(_)) => {
                self.layout.internals_fit(left.len(), right.len())
            }
            _ => false,
        }
    }

    /// Move everything in `right` into `left`, write `left` and free `right`.
    fn absorb(&mut self, left: &mut Node, separator: &[u8], right: Node) -> Result<(), BTreeError> {
        let absorbed = right.id();
        match (&mut *left, right) {
            (Node::Leaf(l), Node::Leaf(r)) => l.merge(r),
            (Node::Internal(l), Node::Internal(r)) => l.merge(separator, r),
            (l, r) => {
                return Err(BTreeError::Corrupt(format!(
                    "siblings {} and {} have different kinds ({:?}, {:?})",
                    l.id(),
                    r.id(),
                    l.kind(),
                    r.kind()
                )));
            }
        }

        self.write_node(left)?;
        self.release(absorbed)?;
        tracing::debug!(
            "merged {:?} block {absorbed} into {}",
            left.kind(),
            left.id()
        );
        Ok(())
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Block store error.
    Storage(StorageError),
    /// Node decoding error.
    Node(NodeError),
    /// Key does not match the tree's key format.
    Key(KeyError),
    /// The block size leaves room for fewer than two keys per node.
    BlockTooSmall { block_size: usize, key_width: usize },
    /// The store holds a tree built over a different key format.
    FormatMismatch {
        expected: KeyFormat,
        found: KeyFormat,
    },
    /// The tree structure is inconsistent.
    Corrupt(String),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Key(e) => write!(f, "key error: {e}"),
            Self::BlockTooSmall {
                block_size,
                key_width,
            } => write!(
                f,
                "block size {block_size} is too small for keys of width {key_width}"
            ),
            Self::FormatMismatch { expected, found } => write!(
                f,
                "key format mismatch: expected {expected:?}, index uses {found:?}"
            ),
            Self::Corrupt(msg) => write!(f, "corrupt tree: {msg}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Key(e) => Some(e),
            Self::BlockTooSmall { .. } | Self::FormatMismatch { .. } | Self::Corrupt(_) => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<KeyError> for BTreeError {
    fn from(e: KeyError) -> Self {
        Self::Key(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::BlockFile;
    use crate::storage::memory::MemoryStore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    // Leaf capacity 4, internal capacity 6 for integer keys
    const SMALL_BLOCK: u32 = 64;

    fn locator(v: i32) -> Locator {
        Locator::new(v.unsigned_abs(), v.unsigned_abs() % 7)
    }

    #[test]
    fn test_open_initializes_empty_tree() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");

        assert_eq!(tree.root_position(), 2);
        assert_eq!(tree.free_list_head(), 0);
        assert_eq!(tree.layout().leaf_capacity, 4);
        assert_eq!(tree.layout().internal_capacity, 6);
        assert_eq!(tree.height().expect("height"), 1);
        assert_eq!(tree.query(1).expect("query"), None);
        assert!(!tree.remove(1).expect("remove"));
    }

    #[test]
    fn test_insert_query_remove_round_trip() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");

        for v in [42, -7, 13, 0, 99, 5, -100, 64] {
            assert!(tree.insert(v, locator(v)).expect("insert"));
        }
        for v in [42, -7, 13, 0, 99, 5, -100, 64] {
            assert_eq!(tree.query(v).expect("query"), Some(locator(v)));
        }
        assert_eq!(tree.query(1).expect("query"), None);

        assert!(tree.remove(13).expect("remove"));
        assert_eq!(tree.query(13).expect("query"), None);
        assert!(!tree.remove(13).expect("remove again"));
        tree.verify().expect("verify");
    }

    #[test]
    fn test_query_and_missed_remove_do_not_write() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        {
            let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");
            for v in 0..40 {
                tree.insert(v, locator(v)).expect("insert");
            }
        }
        let writes = store.writes();
        let reads = store.reads();

        {
            let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("reopen");
            assert_eq!(tree.query(17).expect("query"), Some(locator(17)));
            assert!(!tree.remove(1000).expect("remove missing key"));
            assert!(!tree.insert(3, locator(99)).expect("duplicate insert"));
        }

        assert_eq!(store.writes(), writes);
        assert!(store.reads() > reads);
    }

    #[test]
    fn test_duplicate_insert_keeps_first_locator() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");

        assert!(tree.insert(8, Locator::new(1, 1)).expect("first insert"));
        assert!(!tree.insert(8, Locator::new(2, 2)).expect("duplicate insert"));
        assert_eq!(tree.query(8).expect("query"), Some(Locator::new(1, 1)));
        assert_eq!(tree.verify().expect("verify").entries, 1);
    }

    #[test]
    fn test_split_creates_internal_root() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");
        let capacity = i32::try_from(tree.layout().leaf_capacity).expect("capacity");

        for v in 1..=capacity {
            tree.insert(v, locator(v)).expect("insert");
        }
        assert_eq!(tree.height().expect("height"), 1);

        tree.insert(capacity + 1, locator(capacity + 1))
            .expect("insert overflowing key");

        let Node::Internal(root) = &tree.root else {
            panic!("root should be internal after a split");
        };
        assert_eq!(root.keys.len(), 1);
        // Left leaf keeps size/2 = 2 keys, so the right leaf starts at 3
        assert_eq!(root.keys.get(0), 3i32.to_le_bytes().as_slice());
        assert_eq!(root.children, vec![2, 3]);
        assert_eq!(tree.root_position(), 4);
        assert_eq!(tree.height().expect("height"), 2);

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.leaf_blocks, 2);
        assert_eq!(stats.internal_blocks, 1);
        assert_eq!(stats.entries, 5);
    }

    #[test]
    fn test_merge_releases_blocks_and_reuses_them_first() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        {
            let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");
            for v in 1..=5 {
                tree.insert(v, locator(v)).expect("insert");
            }
            assert_eq!(tree.height().expect("height"), 2);

            // Leaves [1 2] and [3 4] fit in one block, so they merge right away
            // and the root is left with a single child
            assert!(tree.remove(5).expect("remove"));
            assert_eq!(tree.height().expect("height"), 1);
            assert_eq!(tree.root_position(), 2);
            // Root block 4 was freed after leaf block 3
            assert_eq!(tree.free_list_head(), 4);

            // Splitting again draws from the free list instead of growing the store
            tree.insert(5, locator(5)).expect("insert");
            tree.insert(6, locator(6)).expect("insert");
            assert_eq!(tree.height().expect("height"), 2);
            assert_eq!(tree.free_list_head(), 0);
            assert_eq!(tree.root_position(), 3);
            tree.verify().expect("verify");
        }
        assert_eq!(store.block_count(), 5);
    }

    #[test]
    fn test_height_shrinks_back_to_single_leaf() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");

        for v in 0..200 {
            tree.insert(v, locator(v)).expect("insert");
        }
        assert!(tree.height().expect("height") >= 3);
        tree.verify().expect("verify tall tree");

        for v in 0..200 {
            assert!(tree.remove(v).expect("remove"), "key {v}");
        }
        assert_eq!(tree.height().expect("height"), 1);
        let stats = tree.verify().expect("verify empty tree");
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.leaf_blocks, 1);
    }

    #[test]
    fn test_string_keys() {
        let mut store = MemoryStore::new(256).expect("store");
        let format = KeyFormat::string(8).expect("width");
        let mut tree = BPlusTree::open(&mut store, format).expect("open");

        assert!(tree.insert("apple-01", Locator::new(1, 0)).expect("insert"));
        assert!(tree.insert("banana-2", Locator::new(2, 0)).expect("insert"));

        // Only the first 8 bytes are significant
        assert!(!tree.insert("apple-01-extra", Locator::new(3, 0)).expect("insert"));
        assert_eq!(
            tree.query("apple-01-other").expect("query"),
            Some(Locator::new(1, 0))
        );
        assert_eq!(tree.query("apple-02").expect("query"), None);

        assert!(matches!(
            tree.insert("short", Locator::new(4, 0)),
            Err(BTreeError::Key(KeyError::TooShort {
                expected: 8,
                actual: 5
            }))
        ));
        assert!(matches!(
            tree.query(17),
            Err(BTreeError::Key(KeyError::KindMismatch { .. }))
        ));
    }

    #[test]
    fn test_string_keys_split_in_byte_order() {
        let mut store = MemoryStore::new(128).expect("store");
        let format = KeyFormat::string(6).expect("width");
        let mut tree = BPlusTree::open(&mut store, format).expect("open");

        for i in (0u32..100).rev() {
            let key = format!("key{i:03}");
            assert!(tree.insert(key.as_str(), Locator::new(i, 0)).expect("insert"));
        }
        for i in 0u32..100 {
            let key = format!("key{i:03}");
            assert_eq!(
                tree.query(key.as_str()).expect("query"),
                Some(Locator::new(i, 0))
            );
        }
        assert_eq!(tree.verify().expect("verify").entries, 100);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("index.bpt");

        let (root, free_head) = {
            let mut file = BlockFile::create(&path, 128).expect("create");
            let mut tree = BPlusTree::open(&mut file, KeyFormat::integer()).expect("open");
            for v in 0..300 {
                tree.insert(v * 3, locator(v)).expect("insert");
            }
            for v in 0..100 {
                tree.remove(v * 3).expect("remove");
            }
            let state = (tree.root_position(), tree.free_list_head());
            file.sync().expect("sync");
            state
        };

        let mut file = BlockFile::open(&path).expect("reopen");
        let mut tree = BPlusTree::open(&mut file, KeyFormat::integer()).expect("open existing");
        assert_eq!(tree.root_position(), root);
        assert_eq!(tree.free_list_head(), free_head);

        for v in 0..100 {
            assert_eq!(tree.query(v * 3).expect("query"), None);
        }
        for v in 100..300 {
            assert_eq!(tree.query(v * 3).expect("query"), Some(locator(v)));
        }
        assert_eq!(tree.verify().expect("verify").entries, 200);
    }

    #[test]
    fn test_truncated_file_reports_short_read() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("index.bpt");

        {
            let mut file = BlockFile::create(&path, 64).expect("create");
            let mut tree = BPlusTree::open(&mut file, KeyFormat::integer()).expect("open");
            for v in 0..50 {
                tree.insert(v, locator(v)).expect("insert");
            }
            assert_eq!(tree.height().expect("height"), 3);
            assert_eq!(tree.root_position(), 12);
            file.sync().expect("sync");
            assert_eq!(file.block_count().expect("count"), 33);
        }

        // Cut off block 32, the internal node above keys 40 and up
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open raw")
            .set_len(32 * 64)
            .expect("truncate");

        let mut file = BlockFile::open(&path).expect("reopen");
        let mut tree = BPlusTree::open(&mut file, KeyFormat::integer()).expect("open existing");
        assert_eq!(tree.query(5).expect("query"), Some(locator(5)));

        let short_read = |result: Result<_, BTreeError>| {
            matches!(
                result,
                Err(BTreeError::Storage(StorageError::ShortRead {
                    offset: 2048,
                    expected: 64,
                    actual: 0,
                }))
            )
        };
        assert!(short_read(tree.query(45).map(|_| ())));
        assert!(short_read(tree.insert(100, locator(100)).map(|_| ())));
        assert!(short_read(tree.remove(41).map(|_| ())));
    }

    #[test]
    fn test_reopen_with_other_key_format_fails() {
        let mut store = MemoryStore::new(256).expect("store");
        BPlusTree::open(&mut store, KeyFormat::integer()).expect("create tree");

        assert!(matches!(
            BPlusTree::open(&mut store, KeyFormat::string(8).expect("width")),
            Err(BTreeError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_open_rejects_closed_store_and_tiny_blocks() {
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        store.close();
        assert!(matches!(
            BPlusTree::open(&mut store, KeyFormat::integer()),
            Err(BTreeError::Storage(StorageError::NotOpen))
        ));

        // One 40-byte key per leaf is not enough to split
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        assert!(matches!(
            BPlusTree::open(&mut store, KeyFormat::string(40).expect("width")),
            Err(BTreeError::BlockTooSmall {
                block_size: 64,
                key_width: 40
            })
        ));
    }

    #[test]
    fn test_randomized_workload_matches_model() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut store = MemoryStore::new(SMALL_BLOCK).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");
        let mut model = BTreeMap::new();

        for round in 0..4000 {
            let key: i32 = rng.random_range(-250..250);
            if rng.random_bool(0.55) {
                let loc = Locator::new(rng.random_range(0..1000), round);
                let inserted = tree.insert(key, loc).expect("insert");
                assert_eq!(inserted, !model.contains_key(&key), "insert {key}");
                model.entry(key).or_insert(loc);
            } else {
                let removed = tree.remove(key).expect("remove");
                assert_eq!(removed, model.remove(&key).is_some(), "remove {key}");
            }

            if round % 500 == 0 {
                let stats = tree.verify().expect("verify");
                assert_eq!(stats.entries, model.len());
            }
        }

        for key in -250..250 {
            assert_eq!(tree.query(key).expect("query"), model.get(&key).copied());
        }
        assert_eq!(tree.verify().expect("verify").entries, model.len());
    }
}
