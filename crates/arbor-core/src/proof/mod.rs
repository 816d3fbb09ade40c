//! Existence and absence proofs
//!
//! A proof is the authentication path from one or two leaves up to the root.
//! Anyone holding the root hash can check it without access to the tree:
//! - [`ExistenceProof`] shows a key is bound to a value
//! - [`AbsenceProof`] shows a key is missing by exhibiting its in-order
//!   neighbours and checking that they are adjacent
//!
//! Proofs travel as the compact big-endian encoding in [`codec`], or wrapped
//! in a [`ProofOp`] for composition with proofs from other layers.

pub mod codec;
mod op;
mod path;
mod verify;

pub use op::{
    verify_op_chain, AbsenceOp, ProofOp, ProofOperator, TreeProofOp, ValueOp, PROOF_OP_ABSENCE,
    PROOF_OP_VALUE,
};
pub use path::extract_path;
pub use verify::{verify_absence, verify_existence, verify_proof};

use crate::avl::{inner_hash, leaf_hash, value_hash};
use arbor_crypto::Blake3Hash;
use bytes::Bytes;

/// Which side of its parent a proof entry's sibling sits on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    /// Sibling is the left child; the path continues through the right
    Left,
    /// Sibling is the right child; the path continues through the left
    Right,
}

/// One step of an authentication path
///
/// Carries the parent's hashed fields and the hash of the child not on the
/// path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofInnerNode {
    pub position: Position,
    pub height: u8,
    pub size: u64,
    pub version: u64,
    pub sibling: Blake3Hash,
}

impl ProofInnerNode {
    /// Hash of the parent given the hash of the child on the path
    pub fn fold(&self, child: &Blake3Hash) -> Blake3Hash {
        match self.position {
            Position::Left => inner_hash(self.height, self.size, self.version, &self.sibling, child),
            Position::Right => {
                inner_hash(self.height, self.size, self.version, child, &self.sibling)
            }
        }
    }
}

/// The leaf a path starts from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofLeafNode {
    /// At most `u32::MAX` bytes, the limit the tree enforces on keys and the
    /// width of the length prefix on the wire
    pub key: Bytes,
    pub value_hash: Blake3Hash,
    pub version: u64,
}

impl ProofLeafNode {
    pub fn new(key: Bytes, value: &[u8], version: u64) -> Self {
        Self {
            key,
            value_hash: value_hash(value),
            version,
        }
    }

    pub fn hash(&self) -> Blake3Hash {
        leaf_hash(&self.key, &self.value_hash, self.version)
    }
}

/// Proof that a key is present with a particular value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistenceProof {
    pub leaf: ProofLeafNode,
    /// Entries from the leaf's parent up to the root
    pub path: Vec<ProofInnerNode>,
}

/// Proof that a key is not present
///
/// Holds the existence proofs of the largest key below and the smallest key
/// above the missing one. Both are `None` only for the empty tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsenceProof {
    pub predecessor: Option<ExistenceProof>,
    pub successor: Option<ExistenceProof>,
}

/// Result of a proof lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeProof {
    Existence(ExistenceProof),
    Absence(AbsenceProof),
}

impl TreeProof {
    pub fn is_existence(&self) -> bool {
        matches!(self, TreeProof::Existence(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TreeProof::Existence(_) => EXISTENCE,
            TreeProof::Absence(_) => ABSENCE,
        }
    }

    pub fn as_existence(&self) -> Option<&ExistenceProof> {
        match self {
            TreeProof::Existence(proof) => Some(proof),
            TreeProof::Absence(_) => None,
        }
    }

    pub fn as_absence(&self) -> Option<&AbsenceProof> {
        match self {
            TreeProof::Absence(proof) => Some(proof),
            TreeProof::Existence(_) => None,
        }
    }
}

impl From<ExistenceProof> for TreeProof {
    fn from(proof: ExistenceProof) -> Self {
        TreeProof::Existence(proof)
    }
}

impl From<AbsenceProof> for TreeProof {
    fn from(proof: AbsenceProof) -> Self {
        TreeProof::Absence(proof)
    }
}

pub(crate) const EXISTENCE: &str = "existence";
pub(crate) const ABSENCE: &str = "absence";
