//! Offline proof verification
//!
//! Verification needs only the proof, the key (and value) being proven and a
//! trusted root hash.

use super::codec::{decode, decode_absence, decode_existence};
use super::{
    AbsenceProof, ExistenceProof, Position, ProofInnerNode, TreeProof, ABSENCE, EXISTENCE,
};
use crate::avl::{empty_root_hash, leaf_hash, value_hash};
use crate::{CoreError, Result};
use arbor_crypto::Blake3Hash;

impl ExistenceProof {
    /// Root hash implied by the proof's own leaf
    pub fn compute_root(&self) -> Blake3Hash {
        fold_path(self.leaf.hash(), &self.path)
    }

    /// Check that `key` maps to `value` in the tree with root `root`
    ///
    /// The leaf hash is rebuilt from the supplied key and value, not from the
    /// key stored in the proof.
    pub fn verify(&self, key: &[u8], value: &[u8], root: &Blake3Hash) -> Result<()> {
        let leaf = leaf_hash(key, &value_hash(value), self.leaf.version);
        check_root(root, fold_path(leaf, &self.path))
    }

    /// Check the proof's own leaf against `root`
    pub fn verify_root(&self, root: &Blake3Hash) -> Result<()> {
        check_root(root, self.compute_root())
    }

    /// Whether the leaf is the smallest key of the tree
    pub fn is_leftmost(&self) -> bool {
        self.path.iter().all(|e| e.position == Position::Right)
    }

    /// Whether the leaf is the largest key of the tree
    pub fn is_rightmost(&self) -> bool {
        self.path.iter().all(|e| e.position == Position::Left)
    }
}

impl AbsenceProof {
    /// Check that `key` is not present in the tree with root `root`
    pub fn verify(&self, key: &[u8], root: &Blake3Hash) -> Result<()> {
        match (&self.predecessor, &self.successor) {
            (None, None) => check_root(root, empty_root_hash()),
            (Some(pred), None) => {
                pred.verify_root(root)?;
                check_below(pred, key)?;
                if !pred.is_rightmost() {
                    return Err(ordering("sole predecessor is not the last key"));
                }
                Ok(())
            }
            (None, Some(succ)) => {
                succ.verify_root(root)?;
                check_above(succ, key)?;
                if !succ.is_leftmost() {
                    return Err(ordering("sole successor is not the first key"));
                }
                Ok(())
            }
            (Some(pred), Some(succ)) => {
                pred.verify_root(root)?;
                succ.verify_root(root)?;
                check_below(pred, key)?;
                check_above(succ, key)?;
                check_adjacent(&pred.path, &succ.path)
            }
        }
    }
}

impl TreeProof {
    /// Verify against `root`: `Some(value)` for a present key, `None` for an
    /// absent one
    pub fn verify(&self, key: &[u8], value: Option<&[u8]>, root: &Blake3Hash) -> Result<()> {
        match (self, value) {
            (TreeProof::Existence(proof), Some(value)) => proof.verify(key, value, root),
            (TreeProof::Absence(proof), None) => proof.verify(key, root),
            (TreeProof::Existence(_), None) => Err(CoreError::WrongProofKind {
                expected: ABSENCE,
                found: EXISTENCE,
            }),
            (TreeProof::Absence(_), Some(_)) => Err(CoreError::WrongProofKind {
                expected: EXISTENCE,
                found: ABSENCE,
            }),
        }
    }
}

/// Decode and verify a proof of either kind
pub fn verify_proof(
    proof: &[u8],
    key: &[u8],
    value: Option<&[u8]>,
    root: &Blake3Hash,
) -> Result<()> {
    decode(proof)?.verify(key, value, root)
}

/// Decode and verify a proof that `key` maps to `value`
pub fn verify_existence(proof: &[u8], key: &[u8], value: &[u8], root: &Blake3Hash) -> Result<()> {
    decode_existence(proof)?.verify(key, value, root)
}

/// Decode and verify a proof that `key` is absent
pub fn verify_absence(proof: &[u8], key: &[u8], root: &Blake3Hash) -> Result<()> {
    decode_absence(proof)?.verify(key, root)
}

fn fold_path(leaf: Blake3Hash, path: &[ProofInnerNode]) -> Blake3Hash {
    path.iter().fold(leaf, |hash, entry| entry.fold(&hash))
}

fn check_root(expected: &Blake3Hash, actual: Blake3Hash) -> Result<()> {
    if *expected != actual {
        return Err(CoreError::HashMismatch {
            expected: *expected,
            actual,
        });
    }
    Ok(())
}

fn check_below(pred: &ExistenceProof, key: &[u8]) -> Result<()> {
    if pred.leaf.key.as_ref() >= key {
        return Err(ordering(format!(
            "predecessor {} is not below {}",
            hex::encode(&pred.leaf.key),
            hex::encode(key)
        )));
    }
    Ok(())
}

fn check_above(succ: &ExistenceProof, key: &[u8]) -> Result<()> {
    if succ.leaf.key.as_ref() <= key {
        return Err(ordering(format!(
            "successor {} is not above {}",
            hex::encode(&succ.leaf.key),
            hex::encode(key)
        )));
    }
    Ok(())
}

/// Two leaves are adjacent when their paths agree down to a common ancestor,
/// split there to the left and right child, and then the predecessor only
/// descends right while the successor only descends left.
fn check_adjacent(pred: &[ProofInnerNode], succ: &[ProofInnerNode]) -> Result<()> {
    // Walk from the root end
    let mut pred_iter = pred.iter().rev();
    let mut succ_iter = succ.iter().rev();
    let (split_pred, split_succ) = loop {
        match (pred_iter.next(), succ_iter.next()) {
            (Some(p), Some(s)) if p == s => continue,
            (Some(p), Some(s)) => break (p, s),
            _ => return Err(ordering("neighbour paths never diverge")),
        }
    };

    let same_parent = split_pred.height == split_succ.height
        && split_pred.size == split_succ.size
        && split_pred.version == split_succ.version;
    if !same_parent
        || split_pred.position != Position::Right
        || split_succ.position != Position::Left
    {
        return Err(ordering("neighbours do not split at a common ancestor"));
    }
    if !pred_iter.all(|e| e.position == Position::Left) {
        return Err(ordering("predecessor is not the last key of its subtree"));
    }
    if !succ_iter.all(|e| e.position == Position::Right) {
        return Err(ordering("successor is not the first key of its subtree"));
    }
    Ok(())
}

fn ordering(reason: impl Into<String>) -> CoreError {
    CoreError::OrderingViolation(reason.into())
}
