//! Key-level diff between two tree versions

use super::node::Node;
use super::snapshot::ImmutableTree;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::iter::Peekable;

/// Type of change in a diff
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Key was added
    Add,
    /// Key was removed
    Remove,
    /// Value was modified
    Modify,
}

/// A key-value change between two tree versions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValueChange {
    pub key: Bytes,
    pub change_type: ChangeType,
    /// Old value (for Remove and Modify)
    pub old_value: Option<Bytes>,
    /// New value (for Add and Modify)
    pub new_value: Option<Bytes>,
}

impl KeyValueChange {
    pub fn add(key: Bytes, value: Bytes) -> Self {
        Self {
            key,
            change_type: ChangeType::Add,
            old_value: None,
            new_value: Some(value),
        }
    }

    pub fn remove(key: Bytes, value: Bytes) -> Self {
        Self {
            key,
            change_type: ChangeType::Remove,
            old_value: Some(value),
            new_value: None,
        }
    }

    pub fn modify(key: Bytes, old: Bytes, new: Bytes) -> Self {
        Self {
            key,
            change_type: ChangeType::Modify,
            old_value: Some(old),
            new_value: Some(new),
        }
    }
}

/// Changes that turn `base` into `other`, in ascending key order
///
/// Versions with equal root hashes short-circuit to an empty diff; leaves
/// with equal hashes are skipped without comparing values.
pub fn diff_snapshots(base: &ImmutableTree, other: &ImmutableTree) -> Vec<KeyValueChange> {
    if base.root_hash() == other.root_hash() {
        return Vec::new();
    }

    let mut changes = Vec::new();
    let mut base_leaves = Leaves::new(base).peekable();
    let mut other_leaves = Leaves::new(other).peekable();

    loop {
        let order = match (base_leaves.peek(), other_leaves.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => {
                // Same hash means same key, value and version
                if a.hash() == b.hash() {
                    base_leaves.next();
                    other_leaves.next();
                    continue;
                }
                a.key().cmp(b.key())
            }
        };
        match order {
            Ordering::Less => {
                if let Some((key, value)) = next_entry(&mut base_leaves) {
                    changes.push(KeyValueChange::remove(key, value));
                }
            }
            Ordering::Greater => {
                if let Some((key, value)) = next_entry(&mut other_leaves) {
                    changes.push(KeyValueChange::add(key, value));
                }
            }
            Ordering::Equal => {
                let old = next_entry(&mut base_leaves);
                let new = next_entry(&mut other_leaves);
                if let (Some((key, old)), Some((_, new))) = (old, new) {
                    if old != new {
                        changes.push(KeyValueChange::modify(key, old, new));
                    }
                }
            }
        }
    }

    changes
}

fn next_entry<'a>(leaves: &mut Peekable<Leaves<'a>>) -> Option<(Bytes, Bytes)> {
    let leaf = leaves.next()?;
    Some((leaf.key().clone(), leaf.value()?.clone()))
}

/// In-order leaf nodes of a snapshot
struct Leaves<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Leaves<'a> {
    fn new(tree: &'a ImmutableTree) -> Self {
        Self {
            stack: tree.root().map(|root| root.as_ref()).into_iter().collect(),
        }
    }
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match (node.left(), node.right()) {
                (Some(left), Some(right)) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
                _ => return Some(node),
            }
        }
        None
    }
}
