//! Mutable working tree with AVL rebalancing

use super::node::{Node, NodeKind};
use super::snapshot::ImmutableTree;
use crate::proof::TreeProof;
use crate::{CoreError, Result};
use arbor_crypto::Blake3Hash;
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{instrument, trace};

/// A node from a saved version that the working tree no longer references
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Orphan {
    pub hash: Blake3Hash,
    /// Version that created the node
    pub from_version: u64,
}

/// The single mutable tree of a versioned tree
///
/// Every new node is tagged with the pending version. Nodes from earlier
/// versions are shared, never modified; when a mutation drops one of them
/// it is recorded as an [`Orphan`] so its storage can be reclaimed later.
#[derive(Clone, Debug)]
pub struct WorkingTree {
    root: Option<Arc<Node>>,
    /// Root of the last saved version, for rollback
    saved_root: Option<Arc<Node>>,
    /// Version the next save will produce
    version: u64,
    orphans: Vec<Orphan>,
}

impl WorkingTree {
    /// Create an empty tree whose first save produces `version`
    pub fn new(version: u64) -> Self {
        Self {
            root: None,
            saved_root: None,
            version,
            orphans: Vec::new(),
        }
    }

    /// Continue mutating from a saved snapshot
    pub fn from_snapshot(snapshot: &ImmutableTree) -> Self {
        Self {
            root: snapshot.root().cloned(),
            saved_root: snapshot.root().cloned(),
            version: snapshot.version() + 1,
            orphans: Vec::new(),
        }
    }

    /// Version the next save will produce
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }

    /// Root hash of the unsaved state
    pub fn working_hash(&self) -> Blake3Hash {
        self.view().root_hash()
    }

    pub fn size(&self) -> u64 {
        self.root.as_ref().map_or(0, |root| root.size())
    }

    pub fn height(&self) -> u8 {
        self.root.as_ref().map_or(0, |root| root.height())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Whether there are changes since the last save
    pub fn is_dirty(&self) -> bool {
        match (&self.root, &self.saved_root) {
            (None, None) => false,
            (Some(a), Some(b)) => a.hash() != b.hash(),
            _ => true,
        }
    }

    /// Nodes of saved versions dropped since the last save
    pub fn orphans(&self) -> &[Orphan] {
        &self.orphans
    }

    /// Read-only view of the current state, tagged with the pending version
    pub fn view(&self) -> ImmutableTree {
        ImmutableTree::new(self.root.clone(), self.version)
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.view().get(key)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.view().has(key)
    }

    /// Value (if any) with an existence or absence proof against the working hash
    pub fn get_with_proof(&self, key: &[u8]) -> (Option<Bytes>, TreeProof) {
        self.view().get_with_proof(key)
    }

    /// Insert or update a key. Returns `true` if an existing value was replaced.
    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<bool> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;

        let mut mutation = Mutation::new(self.version);
        let (root, updated) = match &self.root {
            None => (
                Arc::new(Node::leaf(key.clone(), value, self.version)),
                false,
            ),
            Some(root) => mutation.insert(root, &key, &value),
        };
        trace!(key = %hex::encode(&key), updated, "set");

        self.root = Some(root);
        self.orphans.extend(mutation.orphans);
        Ok(updated)
    }

    /// Remove a key, returning its value
    ///
    /// A missing key yields [`CoreError::KeyNotFound`] and leaves the tree unchanged.
    #[instrument(skip(self, key), fields(key = %hex::encode(key)))]
    pub fn remove(&mut self, key: &[u8]) -> Result<Bytes> {
        let not_found = || CoreError::KeyNotFound(hex::encode(key));
        let root = self.root.as_ref().ok_or_else(not_found)?;

        let mut mutation = Mutation::new(self.version);
        let (root, value) = mutation.remove(root, key).ok_or_else(not_found)?;

        self.root = root;
        self.orphans.extend(mutation.orphans);
        Ok(value)
    }

    /// Discard unsaved changes
    pub fn rollback(&mut self) {
        self.root = self.saved_root.clone();
        self.orphans.clear();
    }

    /// Freeze the current state as the pending version and advance
    pub(crate) fn mark_saved(&mut self) -> ImmutableTree {
        let snapshot = self.view();
        self.saved_root = self.root.clone();
        self.version += 1;
        self.orphans.clear();
        snapshot
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(CoreError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > u32::MAX as usize {
        return Err(CoreError::InvalidKey(format!(
            "key of {} bytes exceeds the maximum length",
            key.len()
        )));
    }
    Ok(())
}

/// One structural change, building new nodes at `version`
///
/// Orphans are collected locally and only handed to the tree once the
/// change has succeeded.
struct Mutation {
    version: u64,
    orphans: Vec<Orphan>,
}

impl Mutation {
    fn new(version: u64) -> Self {
        Self {
            version,
            orphans: Vec::new(),
        }
    }

    /// Record a node that is being replaced
    fn orphan(&mut self, node: &Node) {
        // Nodes of the pending version were never persisted
        if node.version() < self.version {
            self.orphans.push(Orphan {
                hash: *node.hash(),
                from_version: node.version(),
            });
        }
    }

    fn inner(&self, left: Arc<Node>, right: Arc<Node>) -> Node {
        Node::inner(left, right, self.version)
    }

    fn insert(&mut self, node: &Arc<Node>, key: &Bytes, value: &Bytes) -> (Arc<Node>, bool) {
        match node.kind() {
            NodeKind::Leaf { key: leaf_key, .. } => {
                let leaf = Arc::new(Node::leaf(key.clone(), value.clone(), self.version));
                match key.cmp(leaf_key) {
                    Ordering::Less => (Arc::new(self.inner(leaf, node.clone())), false),
                    Ordering::Greater => (Arc::new(self.inner(node.clone(), leaf)), false),
                    Ordering::Equal => {
                        self.orphan(node);
                        (leaf, true)
                    }
                }
            }
            NodeKind::Inner {
                key: split,
                left,
                right,
                ..
            } => {
                self.orphan(node);
                let (left, right, updated) = if key < split {
                    let (left, updated) = self.insert(left, key, value);
                    (left, right.clone(), updated)
                } else {
                    let (right, updated) = self.insert(right, key, value);
                    (left.clone(), right, updated)
                };
                let node = self.inner(left, right);
                if updated {
                    // Same shape, only the value changed
                    (Arc::new(node), true)
                } else {
                    (self.balance(node), false)
                }
            }
        }
    }

    /// Returns the replacement subtree (`None` when it became empty) and the
    /// removed value, or `None` if the key is absent.
    fn remove(&mut self, node: &Arc<Node>, key: &[u8]) -> Option<(Option<Arc<Node>>, Bytes)> {
        match node.kind() {
            NodeKind::Leaf {
                key: leaf_key,
                value,
            } => {
                if leaf_key.as_ref() != key {
                    return None;
                }
                self.orphan(node);
                Some((None, value.clone()))
            }
            NodeKind::Inner {
                key: split,
                left,
                right,
                ..
            } => {
                let go_left = key < split.as_ref();
                let (child, sibling) = if go_left { (left, right) } else { (right, left) };
                let (new_child, value) = self.remove(child, key)?;
                self.orphan(node);

                let replacement = match new_child {
                    // Parent collapses into the sibling subtree
                    None => sibling.clone(),
                    Some(new_child) => {
                        let node = if go_left {
                            self.inner(new_child, right.clone())
                        } else {
                            self.inner(left.clone(), new_child)
                        };
                        self.balance(node)
                    }
                };
                Some((Some(replacement), value))
            }
        }
    }

    /// Restore the AVL invariant at a freshly built node
    fn balance(&mut self, node: Node) -> Arc<Node> {
        let factor = node.balance_factor();
        let (Some(left), Some(right)) = (node.left().cloned(), node.right().cloned()) else {
            return Arc::new(node);
        };

        if factor > 1 {
            if left.balance_factor() >= 0 {
                self.rotate_right(&node)
            } else {
                // Left-right
                let left = self.rotate_left(&left);
                let node = self.inner(left, right);
                self.rotate_right(&node)
            }
        } else if factor < -1 {
            if right.balance_factor() <= 0 {
                self.rotate_left(&node)
            } else {
                // Right-left
                let right = self.rotate_right(&right);
                let node = self.inner(left, right);
                self.rotate_left(&node)
            }
        } else {
            Arc::new(node)
        }
    }

    /// `(A, B), C` becomes `A, (B, C)`
    fn rotate_right(&mut self, node: &Node) -> Arc<Node> {
        let (Some(pivot), Some(right)) = (node.left(), node.right()) else {
            return Arc::new(node.clone());
        };
        let (Some(a), Some(b)) = (pivot.left(), pivot.right()) else {
            return Arc::new(node.clone());
        };
        self.orphan(node);
        self.orphan(pivot);

        let new_right = Arc::new(self.inner(b.clone(), right.clone()));
        Arc::new(self.inner(a.clone(), new_right))
    }

    /// `A, (B, C)` becomes `(A, B), C`
    fn rotate_left(&mut self, node: &Node) -> Arc<Node> {
        let (Some(left), Some(pivot)) = (node.left(), node.right()) else {
            return Arc::new(node.clone());
        };
        let (Some(b), Some(c)) = (pivot.left(), pivot.right()) else {
            return Arc::new(node.clone());
        };
        self.orphan(node);
        self.orphan(pivot);

        let new_left = Arc::new(self.inner(left.clone(), b.clone()));
        Arc::new(self.inner(new_left, c.clone()))
    }
}
