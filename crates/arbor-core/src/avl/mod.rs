//! Balanced binary Merkle tree
//!
//! Every key lives in a leaf; inner nodes carry two children and a routing
//! key. The tree is rebalanced with AVL rotations on every update, so
//! lookups and proofs are O(log n) regardless of insertion order.
//! - Structural sharing between versions through `Arc<Node>`
//! - Deterministic root hash for a given history of operations
//! - Cheap, thread-safe snapshots

mod diff;
mod hash;
mod node;
mod snapshot;
mod tree;

pub use diff::{diff_snapshots, ChangeType, KeyValueChange};
pub use hash::{empty_root_hash, inner_hash, leaf_hash, value_hash};
pub use node::{Node, NodeKind};
pub use snapshot::{ImmutableTree, Iter};
pub use tree::{Orphan, WorkingTree};

#[cfg(test)]
pub(crate) use tree::tests::check_invariants;
