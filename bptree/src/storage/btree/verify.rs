//! Structural checks and debug rendering for a whole tree.

use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::storage::block::BlockId;
use crate::storage::btree::key::KeyFormat;
use crate::storage::btree::node::{Layout, Node};
use crate::storage::btree::store::NodeStore;
use crate::storage::btree::tree::{BPlusTree, BTreeError};
use crate::storage::io::BlockStore;

/// Shape of a tree that passed verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    pub leaf_blocks: usize,
    pub internal_blocks: usize,
    pub entries: usize,
}

/// Key range a subtree must stay within: `lower <= key < upper`.
#[derive(Clone, Copy)]
struct Bounds<'k> {
    lower: Option<&'k [u8]>,
    upper: Option<&'k [u8]>,
}

struct Verifier {
    format: KeyFormat,
    layout: Layout,
    stats: TreeStats,
    leaf_depth: Option<usize>,
    /// `(position, next)` of every leaf in key order.
    leaves: Vec<(BlockId, BlockId)>,
}

impl Verifier {
    fn visit<S: BlockStore>(
        &mut self,
        nodes: &mut NodeStore<'_, S>,
        node: &Node,
        bounds: Bounds<'_>,
        depth: usize,
    ) -> Result<(), BTreeError> {
        let id = node.id();
        let keys = match node {
            Node::Leaf(leaf) => &leaf.keys,
            Node::Internal(internal) => &internal.keys,
            Node::Empty(_) => {
                return Err(corrupt(format!(
                    "block {id} is on the free list but linked into the tree"
                )));
            }
        };

        for (i, key) in keys.iter().enumerate() {
            if i > 0 && self.format.compare(keys.get(i - 1), key) != Ordering::Less {
                return Err(corrupt(format!("block {id}: keys out of order at index {i}")));
            }
            if bounds.lower.is_some_and(|lower| self.format.compare(key, lower) == Ordering::Less)
                || bounds.upper.is_some_and(|upper| self.format.compare(key, upper) != Ordering::Less)
            {
                return Err(corrupt(format!(
                    "block {id}: key {} outside the range of its parent separators",
                    self.format.display(key)
                )));
            }
        }

        match node {
            Node::Leaf(leaf) => {
                if leaf.keys.len() > self.layout.leaf_capacity {
                    return Err(corrupt(format!("leaf {id} holds more keys than fit in a block")));
                }
                match self.leaf_depth {
                    None => self.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(corrupt(format!(
                            "leaf {id} at depth {depth}, other leaves at depth {expected}"
                        )));
                    }
                    Some(_) => {}
                }
                self.stats.leaf_blocks += 1;
                self.stats.entries += leaf.keys.len();
                self.leaves.push((id, leaf.next));
            }
            Node::Internal(internal) => {
                if internal.keys.len() > self.layout.internal_capacity {
                    return Err(corrupt(format!(
                        "internal node {id} holds more keys than fit in a block"
                    )));
                }
                self.stats.internal_blocks += 1;

                for (i, &child_id) in internal.children.iter().enumerate() {
                    let child_bounds = Bounds {
                        lower: if i == 0 { bounds.lower } else { Some(internal.keys.get(i - 1)) },
                        upper: if i == internal.keys.len() {
                            bounds.upper
                        } else {
                            Some(internal.keys.get(i))
                        },
                    };
                    let child = nodes.read_node(child_id)?;
                    self.visit(nodes, &child, child_bounds, depth + 1)?;
                }
            }
            Node::Empty(_) => {}
        }
        Ok(())
    }

    fn check_leaf_chain(&self) -> Result<(), BTreeError> {
        for pair in self.leaves.windows(2) {
            let ((id, next), (following, _)) = (pair[0], pair[1]);
            if next != following {
                return Err(corrupt(format!(
                    "leaf {id} links to {next}, but the next leaf in key order is {following}"
                )));
            }
        }
        match self.leaves.last() {
            Some(&(id, next)) if next != 0 => {
                Err(corrupt(format!("last leaf {id} links to {next}")))
            }
            _ => Ok(()),
        }
    }
}

fn corrupt(msg: String) -> BTreeError {
    BTreeError::Corrupt(msg)
}

impl<S: BlockStore> BPlusTree<'_, S> {
    /// Walk the whole tree and check its structure.
    ///
    /// Checks key order inside every node, separator bounds across levels,
    /// capacity limits, uniform leaf depth and the leaf chain. Any violation is
    /// reported as [`BTreeError::Corrupt`].
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let mut verifier = Verifier {
            format: self.nodes.meta.key_format,
            layout: self.nodes.layout,
            stats: TreeStats::default(),
            leaf_depth: None,
            leaves: Vec::new(),
        };
        let unbounded = Bounds {
            lower: None,
            upper: None,
        };

        verifier.visit(&mut self.nodes, &self.root, unbounded, 1)?;
        verifier.check_leaf_chain()?;

        let stats = TreeStats {
            height: verifier.leaf_depth.unwrap_or(1),
            ..verifier.stats
        };
        tracing::debug!(
            "verified tree: height={}, leaves={}, internal={}, entries={}",
            stats.height,
            stats.leaf_blocks,
            stats.internal_blocks,
            stats.entries
        );
        Ok(stats)
    }

    /// Render the whole tree on one line.
    ///
    /// Leaf entries print as `key,page,slot`; every child of an internal node
    /// is wrapped in parentheses between the separators.
    pub fn dump(&mut self) -> Result<String, BTreeError> {
        let mut out = String::new();
        let format = self.nodes.meta.key_format;
        dump_node(&mut self.nodes, &format, &self.root, &mut out)?;
        Ok(out)
    }
}

fn dump_node<S: BlockStore>(
    nodes: &mut NodeStore<'_, S>,
    format: &KeyFormat,
    node: &Node,
    out: &mut String,
) -> Result<(), BTreeError> {
    match node {
        Node::Leaf(leaf) => {
            for (i, (key, loc)) in leaf.keys.iter().zip(&leaf.locators).enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{},{},{}", format.display(key), loc.page, loc.slot);
            }
        }
        Node::Internal(internal) => {
            for (i, &child_id) in internal.children.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " {} ", format.display(internal.keys.get(i - 1)));
                }
                let child = nodes.read_tree_node(child_id)?;
                out.push('(');
                dump_node(nodes, format, &child, out)?;
                out.push(')');
            }
        }
        Node::Empty(empty) => {
            let _ = write!(out, "<free {}>", empty.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::node::Locator;
    use crate::storage::memory::MemoryStore;

    #[test]
    fn test_verify_reports_shape() {
        let mut store = MemoryStore::new(64).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");

        assert_eq!(
            tree.verify().expect("verify empty"),
            TreeStats {
                height: 1,
                leaf_blocks: 1,
                internal_blocks: 0,
                entries: 0
            }
        );

        for v in 0..60 {
            tree.insert(v, Locator::new(0, 0)).expect("insert");
        }
        let stats = tree.verify().expect("verify");
        assert_eq!(stats.entries, 60);
        assert_eq!(stats.height, tree.height().expect("height"));
        assert!(stats.internal_blocks >= 1);
    }

    #[test]
    fn test_dump_renders_leaves_and_separators() {
        let mut store = MemoryStore::new(64).expect("store");
        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");

        for v in 1..=3 {
            tree.insert(v, Locator::new(10, v.unsigned_abs())).expect("insert");
        }
        assert_eq!(tree.dump().expect("dump"), "1,10,1 2,10,2 3,10,3");

        for v in 4..=5 {
            tree.insert(v, Locator::new(10, v.unsigned_abs())).expect("insert");
        }
        assert_eq!(
            tree.dump().expect("dump"),
            "(1,10,1 2,10,2) 3 (3,10,3 4,10,4 5,10,5)"
        );
    }

    #[test]
    fn test_verify_detects_broken_ordering() {
        let mut store = MemoryStore::new(64).expect("store");
        let root = {
            let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("open");
            for v in [1, 2, 3] {
                tree.insert(v, Locator::new(0, 0)).expect("insert");
            }
            tree.root_position()
        };

        // Swap the first two keys of the root leaf behind the tree's back
        let layout = Layout::new(64, 4);
        let mut block = store.read_block(root).expect("read root");
        let keys_at = 12 + 2 * layout.leaf_capacity * 4;
        block.write_u32(keys_at, 2);
        block.write_u32(keys_at + 4, 1);
        store.write_block(root, &block).expect("write root");

        let mut tree = BPlusTree::open(&mut store, KeyFormat::integer()).expect("reopen");
        assert!(matches!(tree.verify(), Err(BTreeError::Corrupt(_))));
    }
}
