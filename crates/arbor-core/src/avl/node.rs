//! AVL tree node types

use super::hash::{inner_hash, leaf_hash, value_hash};
use arbor_crypto::Blake3Hash;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Leaf or inner payload of a node
#[derive(Clone)]
pub enum NodeKind {
    /// A stored key/value pair
    Leaf { key: Bytes, value: Bytes },
    /// Two ordered children
    Inner {
        /// Smallest key of the right subtree; keys below it route left
        key: Bytes,
        height: u8,
        size: u64,
        left: Arc<Node>,
        right: Arc<Node>,
    },
}

/// An immutable, content-addressed tree vertex
///
/// Nodes are never modified after construction. Updates build new nodes
/// that point at the untouched subtrees of the old ones.
#[derive(Clone)]
pub struct Node {
    kind: NodeKind,
    version: u64,
    hash: Blake3Hash,
}

impl Node {
    /// Create a leaf
    pub fn leaf(key: Bytes, value: Bytes, version: u64) -> Self {
        let hash = leaf_hash(&key, &value_hash(&value), version);
        Self {
            kind: NodeKind::Leaf { key, value },
            version,
            hash,
        }
    }

    /// Create an inner node over two children, deriving height, size and hash
    pub fn inner(left: Arc<Node>, right: Arc<Node>, version: u64) -> Self {
        let height = left.height().max(right.height()) + 1;
        let size = left.size() + right.size();
        let hash = inner_hash(height, size, version, left.hash(), right.hash());
        let key = right.min_key().clone();
        Self {
            kind: NodeKind::Inner {
                key,
                height,
                size,
                left,
                right,
            },
            version,
            hash,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Leaf key, or the routing key of an inner node
    pub fn key(&self) -> &Bytes {
        match &self.kind {
            NodeKind::Leaf { key, .. } | NodeKind::Inner { key, .. } => key,
        }
    }

    /// Leaf value, `None` for inner nodes
    pub fn value(&self) -> Option<&Bytes> {
        match &self.kind {
            NodeKind::Leaf { value, .. } => Some(value),
            NodeKind::Inner { .. } => None,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Cached content hash
    pub fn hash(&self) -> &Blake3Hash {
        &self.hash
    }

    /// Recompute the hash from this node's fields and its children's hashes
    pub fn compute_hash(&self) -> Blake3Hash {
        match &self.kind {
            NodeKind::Leaf { key, value } => leaf_hash(key, &value_hash(value), self.version),
            NodeKind::Inner {
                height,
                size,
                left,
                right,
                ..
            } => inner_hash(*height, *size, self.version, left.hash(), right.hash()),
        }
    }

    pub fn height(&self) -> u8 {
        match &self.kind {
            NodeKind::Leaf { .. } => 0,
            NodeKind::Inner { height, .. } => *height,
        }
    }

    /// Number of leaves in this subtree
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::Leaf { .. } => 1,
            NodeKind::Inner { size, .. } => *size,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn left(&self) -> Option<&Arc<Node>> {
        match &self.kind {
            NodeKind::Inner { left, .. } => Some(left),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn right(&self) -> Option<&Arc<Node>> {
        match &self.kind {
            NodeKind::Inner { right, .. } => Some(right),
            NodeKind::Leaf { .. } => None,
        }
    }

    /// Height difference `left - right`; zero for leaves
    pub fn balance_factor(&self) -> i16 {
        match &self.kind {
            NodeKind::Leaf { .. } => 0,
            NodeKind::Inner { left, right, .. } => {
                i16::from(left.height()) - i16::from(right.height())
            }
        }
    }

    /// Smallest key stored in this subtree
    pub fn min_key(&self) -> &Bytes {
        let mut node = self;
        while let NodeKind::Inner { left, .. } = &node.kind {
            node = left;
        }
        node.key()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("is_leaf", &self.is_leaf())
            .field("key", &hex::encode(self.key()))
            .field("version", &self.version)
            .field("height", &self.height())
            .field("size", &self.size())
            .field("hash", &self.hash.short())
            .finish()
    }
}
