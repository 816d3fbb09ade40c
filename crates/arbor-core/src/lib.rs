//! # Arbor Core
//!
//! Core engine for Arbor, a versioned key-value tree with Merkle proofs.
//!
//! This crate provides:
//! - **AVL Tree**: a balanced binary Merkle tree with deterministic hashing
//! - **Versions**: copy-on-write snapshots persisted to a [`KvStore`](arbor_store::KvStore)
//! - **Proofs**: compact existence and absence proofs, verifiable offline
//!   against a root hash
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            VersionedTree                │
//! ├─────────────────────────────────────────┤
//! │  WorkingTree  │  ImmutableTree  │ Proof │
//! ├─────────────────────────────────────────┤
//! │               NodeDb                    │
//! ├─────────────────────────────────────────┤
//! │               KvStore                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use arbor_core::VersionedTree;
//! use arbor_store::MemoryKvStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut tree = VersionedTree::new(Arc::new(MemoryKvStore::new()), Default::default());
//! tree.set("alice", "100").unwrap();
//! let (root, version) = tree.save_version().await.unwrap();
//!
//! let snapshot = tree.load_version(version).await.unwrap();
//! let (value, proof) = snapshot.get_with_proof(b"alice");
//! proof.verify(b"alice", value.as_deref(), &root).unwrap();
//! # }
//! ```

pub mod avl;
pub mod config;
pub mod error;
pub mod nodedb;
pub mod proof;
pub mod versioned;

pub use avl::{ImmutableTree, Node, NodeKind, WorkingTree};
pub use config::TreeConfig;
pub use error::{CoreError, Result};
pub use nodedb::NodeDb;
pub use proof::{AbsenceProof, ExistenceProof, TreeProof};
pub use versioned::VersionedTree;
