//! Immutable tree snapshots
//!
//! A snapshot is a root pointer tagged with a version. It is cheap to clone
//! and safe to read from any number of threads: nodes are never modified,
//! and subtrees are shared with other versions through `Arc`.

use super::hash::empty_root_hash;
use super::node::{Node, NodeKind};
use crate::proof::{self, TreeProof};
use arbor_crypto::Blake3Hash;
use bytes::Bytes;
use std::sync::Arc;

/// A read-only tree at a fixed version
#[derive(Clone, Debug)]
pub struct ImmutableTree {
    root: Option<Arc<Node>>,
    version: u64,
}

impl ImmutableTree {
    pub fn new(root: Option<Arc<Node>>, version: u64) -> Self {
        Self { root, version }
    }

    /// An empty tree at `version`
    pub fn empty(version: u64) -> Self {
        Self::new(None, version)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }

    /// Commitment to every key/value pair in this version
    pub fn root_hash(&self) -> Blake3Hash {
        self.root
            .as_ref()
            .map_or_else(empty_root_hash, |root| *root.hash())
    }

    /// Number of keys
    pub fn size(&self) -> u64 {
        self.root.as_ref().map_or(0, |root| root.size())
    }

    pub fn height(&self) -> u8 {
        self.root.as_ref().map_or(0, |root| root.height())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let mut node = self.root.as_ref()?;
        loop {
            match node.kind() {
                NodeKind::Leaf {
                    key: leaf_key,
                    value,
                } => return (leaf_key.as_ref() == key).then(|| value.clone()),
                NodeKind::Inner {
                    key: split,
                    left,
                    right,
                    ..
                } => node = if key < split.as_ref() { left } else { right },
            }
        }
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// In-order position of `key` together with its value
    ///
    /// For an absent key the index is where it would be inserted.
    pub fn get_with_index(&self, key: &[u8]) -> (u64, Option<Bytes>) {
        let Some(mut node) = self.root.as_ref() else {
            return (0, None);
        };
        let mut index = 0;
        loop {
            match node.kind() {
                NodeKind::Leaf {
                    key: leaf_key,
                    value,
                } => {
                    return match key.cmp(leaf_key.as_ref()) {
                        std::cmp::Ordering::Less => (index, None),
                        std::cmp::Ordering::Equal => (index, Some(value.clone())),
                        std::cmp::Ordering::Greater => (index + 1, None),
                    };
                }
                NodeKind::Inner {
                    key: split,
                    left,
                    right,
                    ..
                } => {
                    if key < split.as_ref() {
                        node = left;
                    } else {
                        index += left.size();
                        node = right;
                    }
                }
            }
        }
    }

    /// Key and value at an in-order position
    pub fn get_by_index(&self, index: u64) -> Option<(Bytes, Bytes)> {
        let mut node = self.root.as_ref()?;
        if index >= node.size() {
            return None;
        }
        let mut index = index;
        loop {
            match node.kind() {
                NodeKind::Leaf { key, value } => return Some((key.clone(), value.clone())),
                NodeKind::Inner { left, right, .. } => {
                    if index < left.size() {
                        node = left;
                    } else {
                        index -= left.size();
                        node = right;
                    }
                }
            }
        }
    }

    /// Iterate over all key-value pairs in ascending key order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stack: self.root.as_deref().into_iter().collect(),
        }
    }

    /// Key-value pairs with `start <= key < end`; `None` leaves a side open
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<(Bytes, Bytes)> {
        let mut result = Vec::new();
        if let Some(root) = &self.root {
            collect_range(root, start, end, &mut result);
        }
        result
    }

    /// Value (if any) with an existence or absence proof against [`Self::root_hash`]
    pub fn get_with_proof(&self, key: &[u8]) -> (Option<Bytes>, TreeProof) {
        proof::extract_path(self, key)
    }
}

fn collect_range(
    node: &Node,
    start: Option<&[u8]>,
    end: Option<&[u8]>,
    result: &mut Vec<(Bytes, Bytes)>,
) {
    match node.kind() {
        NodeKind::Leaf { key, value } => {
            let after_start = start.map_or(true, |s| key.as_ref() >= s);
            let before_end = end.map_or(true, |e| key.as_ref() < e);
            if after_start && before_end {
                result.push((key.clone(), value.clone()));
            }
        }
        NodeKind::Inner {
            key: split,
            left,
            right,
            ..
        } => {
            // Left keys are below the split, right keys at or above it
            if start.map_or(true, |s| s < split.as_ref()) {
                collect_range(left, start, end, result);
            }
            if end.map_or(true, |e| split.as_ref() < e) {
                collect_range(right, start, end, result);
            }
        }
    }
}

/// In-order leaf iterator
pub struct Iter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Bytes, &'a Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node.kind() {
                NodeKind::Leaf { key, value } => return Some((key, value)),
                NodeKind::Inner { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avl::WorkingTree;
    use std::thread;

    fn sample() -> ImmutableTree {
        let mut tree = WorkingTree::new(1);
        for k in [0x10u8, 0x20, 0x30, 0x40, 0x50] {
            tree.set(vec![k], vec![k + 1]).unwrap();
        }
        tree.view()
    }

    #[test]
    fn test_empty_tree() {
        let tree = ImmutableTree::empty(3);
        assert_eq!(tree.version(), 3);
        assert_eq!(tree.root_hash(), empty_root_hash());
        assert_eq!(tree.get(b"a"), None);
        assert_eq!(tree.get_with_index(b"a"), (0, None));
        assert_eq!(tree.get_by_index(0), None);
        assert_eq!(tree.iter().count(), 0);
    }

    #[test]
    fn test_get_with_index() {
        let tree = sample();
        assert_eq!(tree.get_with_index(&[0x10]), (0, Some(Bytes::from_static(&[0x11]))));
        assert_eq!(tree.get_with_index(&[0x30]), (2, Some(Bytes::from_static(&[0x31]))));
        assert_eq!(tree.get_with_index(&[0x00]), (0, None));
        assert_eq!(tree.get_with_index(&[0x35]), (3, None));
        assert_eq!(tree.get_with_index(&[0xff]), (5, None));
    }

    #[test]
    fn test_get_by_index() {
        let tree = sample();
        for (i, k) in [0x10u8, 0x20, 0x30, 0x40, 0x50].into_iter().enumerate() {
            let (key, value) = tree.get_by_index(i as u64).unwrap();
            assert_eq!(key.as_ref(), &[k]);
            assert_eq!(value.as_ref(), &[k + 1]);
        }
        assert_eq!(tree.get_by_index(5), None);
    }

    #[test]
    fn test_tree_iteration() {
        let mut tree = WorkingTree::new(1);
        tree.set("c", "3").unwrap();
        tree.set("a", "1").unwrap();
        tree.set("b", "2").unwrap();

        let view = tree.view();
        let entries: Vec<_> = view.iter().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0.as_ref(), b"a");
        assert_eq!(entries[1].0.as_ref(), b"b");
        assert_eq!(entries[2].0.as_ref(), b"c");
    }

    #[test]
    fn test_range() {
        let tree = sample();
        let keys = |entries: Vec<(Bytes, Bytes)>| -> Vec<u8> {
            entries.into_iter().map(|(k, _)| k[0]).collect()
        };

        assert_eq!(keys(tree.range(Some(&[0x20]), Some(&[0x40]))), vec![0x20, 0x30]);
        assert_eq!(keys(tree.range(None, Some(&[0x21]))), vec![0x10, 0x20]);
        assert_eq!(keys(tree.range(Some(&[0x41]), None)), vec![0x50]);
        assert_eq!(keys(tree.range(None, None)).len(), 5);
        assert!(tree.range(Some(&[0x60]), None).is_empty());
    }

    #[test]
    fn test_snapshot_survives_later_mutation() {
        let mut tree = WorkingTree::new(1);
        tree.set("a", "1").unwrap();
        let frozen = tree.mark_saved();

        tree.set("a", "2").unwrap();
        tree.set("b", "3").unwrap();

        assert_eq!(frozen.get(b"a"), Some(Bytes::from("1")));
        assert_eq!(frozen.get(b"b"), None);
        assert_eq!(tree.get(b"a"), Some(Bytes::from("2")));
    }

    #[test]
    fn test_concurrent_readers() {
        let mut tree = WorkingTree::new(1);
        for i in 0u16..500 {
            tree.set(i.to_be_bytes().to_vec(), i.to_le_bytes().to_vec())
                .unwrap();
        }
        let snapshot = tree.mark_saved();
        let root = snapshot.root_hash();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let snapshot = snapshot.clone();
                thread::spawn(move || {
                    for i in (t..500u16).step_by(8) {
                        let key = i.to_be_bytes();
                        assert_eq!(snapshot.get(&key).unwrap().as_ref(), &i.to_le_bytes());
                        let (value, proof) = snapshot.get_with_proof(&key);
                        proof.verify(&key, value.as_deref(), &root).unwrap();
                    }
                })
            })
            .collect();

        // Keep mutating the working tree while readers run
        for i in 500u16..600 {
            tree.set(i.to_be_bytes().to_vec(), "late").unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(snapshot.size(), 500);
    }
}
