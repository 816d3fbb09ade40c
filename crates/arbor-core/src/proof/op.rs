//! Proof operators for layered verification
//!
//! A tree proof wrapped in a [`ProofOp`] can be chained with proofs from
//! other layers (for example a store that commits to many tree roots). Each
//! operator maps its inputs to the root of its layer, and the last output of
//! the chain must equal the trusted root.

use super::codec::{decode_absence, decode_existence};
use super::{AbsenceProof, ExistenceProof, TreeProof};
use crate::avl::{empty_root_hash, leaf_hash, value_hash};
use crate::{CoreError, Result};
use arbor_crypto::Blake3Hash;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Type tag of a [`ValueOp`]
pub const PROOF_OP_VALUE: &str = "tree:value";

/// Type tag of an [`AbsenceOp`]
pub const PROOF_OP_ABSENCE: &str = "tree:absence";

/// Serializable, type-tagged proof step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOp {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// One verifiable step of a layered proof
pub trait ProofOperator: Send + Sync {
    /// Map this layer's inputs to its root
    fn run(&self, args: &[Vec<u8>]) -> Result<Vec<Vec<u8>>>;

    /// Key this step proves, matched against the key path
    fn key(&self) -> &[u8];

    fn proof_op(&self) -> ProofOp;
}

/// Proves that a key holds the value passed as the single argument
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueOp {
    pub key: Bytes,
    pub proof: ExistenceProof,
}

impl ValueOp {
    pub fn new(key: impl Into<Bytes>, proof: ExistenceProof) -> Self {
        Self {
            key: key.into(),
            proof,
        }
    }
}

impl ProofOperator for ValueOp {
    fn run(&self, args: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let [value] = args else {
            return Err(arity(PROOF_OP_VALUE, 1, args.len()));
        };
        // Rebuilt from the operator's key so a proof for another key cannot
        // reach the same root
        let leaf = leaf_hash(&self.key, &value_hash(value), self.proof.leaf.version);
        let root = self
            .proof
            .path
            .iter()
            .fold(leaf, |hash, entry| entry.fold(&hash));
        Ok(vec![root.as_bytes().to_vec()])
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn proof_op(&self) -> ProofOp {
        ProofOp {
            op_type: PROOF_OP_VALUE.to_string(),
            key: self.key.to_vec(),
            data: self.proof.to_bytes().to_vec(),
        }
    }
}

/// Proves that a key is absent; takes no arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsenceOp {
    pub key: Bytes,
    pub proof: AbsenceProof,
}

impl AbsenceOp {
    pub fn new(key: impl Into<Bytes>, proof: AbsenceProof) -> Self {
        Self {
            key: key.into(),
            proof,
        }
    }
}

impl ProofOperator for AbsenceOp {
    fn run(&self, args: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        if !args.is_empty() {
            return Err(arity(PROOF_OP_ABSENCE, 0, args.len()));
        }
        let pred_root = self.proof.predecessor.as_ref().map(|p| p.compute_root());
        let succ_root = self.proof.successor.as_ref().map(|p| p.compute_root());
        let root = match (pred_root, succ_root) {
            (Some(pred), Some(succ)) if pred != succ => {
                return Err(CoreError::HashMismatch {
                    expected: pred,
                    actual: succ,
                });
            }
            (Some(root), _) | (None, Some(root)) => root,
            (None, None) => empty_root_hash(),
        };
        self.proof.verify(&self.key, &root)?;
        Ok(vec![root.as_bytes().to_vec()])
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn proof_op(&self) -> ProofOp {
        ProofOp {
            op_type: PROOF_OP_ABSENCE.to_string(),
            key: self.key.to_vec(),
            data: self.proof.to_bytes().to_vec(),
        }
    }
}

/// Either tree operator, recovered from a [`ProofOp`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeProofOp {
    Value(ValueOp),
    Absence(AbsenceOp),
}

impl TreeProofOp {
    /// Decode by type tag
    pub fn decode(op: &ProofOp) -> Result<Self> {
        match op.op_type.as_str() {
            PROOF_OP_VALUE => Ok(TreeProofOp::Value(ValueOp::new(
                op.key.clone(),
                decode_existence(&op.data)?,
            ))),
            PROOF_OP_ABSENCE => Ok(TreeProofOp::Absence(AbsenceOp::new(
                op.key.clone(),
                decode_absence(&op.data)?,
            ))),
            other => Err(CoreError::MalformedProof(format!(
                "unknown proof op type {other:?}"
            ))),
        }
    }

    /// Wrap the result of a proof lookup for `key`
    pub fn from_proof(key: impl Into<Bytes>, proof: TreeProof) -> Self {
        match proof {
            TreeProof::Existence(proof) => TreeProofOp::Value(ValueOp::new(key, proof)),
            TreeProof::Absence(proof) => TreeProofOp::Absence(AbsenceOp::new(key, proof)),
        }
    }

    fn operator(&self) -> &dyn ProofOperator {
        match self {
            TreeProofOp::Value(op) => op,
            TreeProofOp::Absence(op) => op,
        }
    }
}

impl ProofOperator for TreeProofOp {
    fn run(&self, args: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        self.operator().run(args)
    }

    fn key(&self) -> &[u8] {
        self.operator().key()
    }

    fn proof_op(&self) -> ProofOp {
        self.operator().proof_op()
    }
}

/// Run a chain of operators, innermost first, and check it ends at `root`
///
/// `keys` is the key path from the outermost layer to the innermost; each
/// operator with a non-empty key consumes one key from the end.
pub fn verify_op_chain(
    ops: &[&dyn ProofOperator],
    root: &Blake3Hash,
    keys: &[&[u8]],
    args: Vec<Vec<u8>>,
) -> Result<()> {
    let mut keys = keys.to_vec();
    let mut args = args;
    for (i, op) in ops.iter().enumerate() {
        let key = op.key();
        if !key.is_empty() {
            let Some(expected) = keys.pop() else {
                return Err(CoreError::MalformedProof(format!(
                    "op {i}: key path exhausted at {}",
                    hex::encode(key)
                )));
            };
            if expected != key {
                return Err(CoreError::MalformedProof(format!(
                    "op {i}: key {} does not match key path entry {}",
                    hex::encode(key),
                    hex::encode(expected)
                )));
            }
        }
        args = op.run(&args)?;
    }

    if !keys.is_empty() {
        return Err(CoreError::MalformedProof(format!(
            "{} key path entries left unconsumed",
            keys.len()
        )));
    }
    let [output] = args.as_slice() else {
        return Err(CoreError::MalformedProof(format!(
            "chain produced {} outputs",
            args.len()
        )));
    };
    let actual = Blake3Hash::from_slice(output)
        .map_err(|e| CoreError::MalformedProof(format!("chain output: {e}")))?;
    if actual != *root {
        return Err(CoreError::HashMismatch {
            expected: *root,
            actual,
        });
    }
    Ok(())
}

fn arity(op_type: &str, expected: usize, actual: usize) -> CoreError {
    CoreError::MalformedProof(format!(
        "{op_type} takes {expected} argument(s), got {actual}"
    ))
}
