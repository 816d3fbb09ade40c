//! Authentication path extraction

use super::{AbsenceProof, ExistenceProof, Position, ProofInnerNode, ProofLeafNode, TreeProof};
use crate::avl::{ImmutableTree, Node};
use bytes::Bytes;
use std::sync::Arc;

/// Look up `key` in `tree` and prove the result against its root hash
///
/// A present key yields an existence proof. A missing key yields the
/// existence proofs of its in-order neighbours; either side is `None` when the
/// key falls outside the stored range, and both are `None` for an empty tree.
pub fn extract_path(tree: &ImmutableTree, key: &[u8]) -> (Option<Bytes>, TreeProof) {
    let Some(root) = tree.root() else {
        return (
            None,
            AbsenceProof {
                predecessor: None,
                successor: None,
            }
            .into(),
        );
    };

    let (leaf, path) = descend(root, |node| key < node.key().as_ref());
    if leaf.key().as_ref() == key {
        let value = leaf.value().cloned();
        return (value, leaf_proof(leaf, path).into());
    }

    // Number of stored keys below `key`
    let (index, _) = tree.get_with_index(key);
    let predecessor = index.checked_sub(1).map(|i| proof_at_index(root, i));
    let successor = (index < root.size()).then(|| proof_at_index(root, index));

    (
        None,
        AbsenceProof {
            predecessor,
            successor,
        }
        .into(),
    )
}

/// Existence proof for the leaf at in-order position `index`
fn proof_at_index(root: &Arc<Node>, mut index: u64) -> ExistenceProof {
    let (leaf, path) = descend(root, |node| {
        let left_size = node.left().map_or(0, |left| left.size());
        if index < left_size {
            true
        } else {
            index -= left_size;
            false
        }
    });
    leaf_proof(leaf, path)
}

/// Walk to a leaf, recording the sibling of every step
///
/// The returned path is ordered from the leaf's parent to the root.
fn descend<'a>(
    root: &'a Arc<Node>,
    mut go_left: impl FnMut(&Arc<Node>) -> bool,
) -> (&'a Arc<Node>, Vec<ProofInnerNode>) {
    let mut node = root;
    let mut path = Vec::with_capacity(usize::from(root.height()));
    while let (Some(left), Some(right)) = (node.left(), node.right()) {
        let (next, sibling, position) = if go_left(node) {
            (left, right, Position::Right)
        } else {
            (right, left, Position::Left)
        };
        path.push(ProofInnerNode {
            position,
            height: node.height(),
            size: node.size(),
            version: node.version(),
            sibling: *sibling.hash(),
        });
        node = next;
    }
    path.reverse();
    (node, path)
}

fn leaf_proof(leaf: &Node, path: Vec<ProofInnerNode>) -> ExistenceProof {
    ExistenceProof {
        leaf: ProofLeafNode::new(
            leaf.key().clone(),
            leaf.value().map_or(&[][..], |value| value.as_ref()),
            leaf.version(),
        ),
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avl::WorkingTree;

    fn tree_with(keys: &[u8]) -> ImmutableTree {
        let mut tree = WorkingTree::new(1);
        for &k in keys {
            tree.set(vec![k], vec![k]).unwrap();
        }
        tree.view()
    }

    fn leaf_key(proof: &Option<ExistenceProof>) -> Option<u8> {
        proof.as_ref().map(|p| p.leaf.key[0])
    }

    #[test]
    fn test_existence_path_folds_to_root() {
        let tree = tree_with(&[1, 2, 3, 4, 5, 6, 7]);
        let (value, proof) = extract_path(&tree, &[5]);
        assert_eq!(value.as_deref(), Some(&[5u8][..]));

        let TreeProof::Existence(proof) = proof else {
            panic!("expected existence proof");
        };
        let mut hash = proof.leaf.hash();
        for entry in &proof.path {
            hash = entry.fold(&hash);
        }
        assert_eq!(hash, tree.root_hash());
        // Entries climb from the leaf towards the root
        let heights: Vec<u8> = proof.path.iter().map(|e| e.height).collect();
        assert!(heights.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_single_leaf_has_empty_path() {
        let tree = tree_with(&[9]);
        let (_, proof) = extract_path(&tree, &[9]);
        assert!(proof.as_existence().unwrap().path.is_empty());
    }

    #[test]
    fn test_absence_between_neighbours() {
        let tree = tree_with(&[0x10, 0x20, 0x30, 0x40]);
        let (value, proof) = extract_path(&tree, &[0x25]);
        assert!(value.is_none());

        let absence = proof.as_absence().unwrap();
        assert_eq!(leaf_key(&absence.predecessor), Some(0x20));
        assert_eq!(leaf_key(&absence.successor), Some(0x30));
    }

    #[test]
    fn test_absence_outside_range_is_one_sided() {
        let tree = tree_with(&[0x10, 0x20, 0x30]);

        let (_, below) = extract_path(&tree, &[0x01]);
        let below = below.as_absence().unwrap();
        assert_eq!(leaf_key(&below.predecessor), None);
        assert_eq!(leaf_key(&below.successor), Some(0x10));

        let (_, above) = extract_path(&tree, &[0xf0]);
        let above = above.as_absence().unwrap();
        assert_eq!(leaf_key(&above.predecessor), Some(0x30));
        assert_eq!(leaf_key(&above.successor), None);
    }

    #[test]
    fn test_empty_tree_has_no_neighbours() {
        let (value, proof) = extract_path(&ImmutableTree::empty(1), b"k");
        assert!(value.is_none());
        assert_eq!(
            proof,
            TreeProof::Absence(AbsenceProof {
                predecessor: None,
                successor: None
            })
        );
    }
}
