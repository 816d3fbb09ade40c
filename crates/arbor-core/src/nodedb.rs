//! Node persistence on top of a [`KvStore`]
//!
//! Three record families share the store:
//!
//! ```text
//! n ‖ hash                      → DAG-CBOR node record
//! r ‖ version (u64 BE)          → root hash of that version
//! o ‖ to (u64 BE) ‖ from (u64 BE) ‖ hash → orphan marker (empty value)
//! ```
//!
//! An orphan marker says the node was created in `from` and is last
//! referenced by version `to`. Deleting versions walks these markers to find
//! nodes no remaining version needs.

use crate::avl::{empty_root_hash, ImmutableTree, Node, NodeKind, Orphan};
use crate::{CoreError, Result};
use arbor_crypto::{Blake3Hash, HASH_BYTE_SIZE};
use arbor_store::KvStore;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

const NODE_PREFIX: u8 = b'n';
const ROOT_PREFIX: u8 = b'r';
const ORPHAN_PREFIX: u8 = b'o';

const ORPHAN_KEY_LEN: usize = 1 + 8 + 8 + HASH_BYTE_SIZE;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A node as written to the store; children are referenced by hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum StoredNode {
    Leaf {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
        version: u64,
    },
    Inner {
        height: u8,
        size: u64,
        version: u64,
        #[serde(with = "serde_bytes")]
        left: Vec<u8>,
        #[serde(with = "serde_bytes")]
        right: Vec<u8>,
    },
}

impl StoredNode {
    fn from_node(node: &Node) -> Self {
        match node.kind() {
            NodeKind::Leaf { key, value } => StoredNode::Leaf {
                key: key.to_vec(),
                value: value.to_vec(),
                version: node.version(),
            },
            NodeKind::Inner {
                height,
                size,
                left,
                right,
                ..
            } => StoredNode::Inner {
                height: *height,
                size: *size,
                version: node.version(),
                left: left.hash().as_bytes().to_vec(),
                right: right.hash().as_bytes().to_vec(),
            },
        }
    }

    fn version(&self) -> u64 {
        match self {
            StoredNode::Leaf { version, .. } | StoredNode::Inner { version, .. } => *version,
        }
    }
}

/// Persistent node database with an LRU cache of decoded nodes
pub struct NodeDb<S: KvStore> {
    store: Arc<S>,
    cache: Mutex<LruCache<Blake3Hash, Arc<Node>>>,
}

impl<S: KvStore> NodeDb<S> {
    pub fn new(store: Arc<S>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of decoded nodes held in memory
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Load a node and, recursively, its whole subtree
    ///
    /// Every node is re-hashed on load; a record that does not match its key
    /// is reported as [`CoreError::TreeCorruption`]. Loading is eager: the
    /// returned node owns its full subtree, so a loaded version stays in
    /// memory for as long as its snapshot does. The LRU cache only bounds
    /// the extra nodes kept for reuse when another version sharing them is
    /// loaded.
    pub fn get_node<'a>(&'a self, hash: &'a Blake3Hash) -> BoxFuture<'a, Result<Arc<Node>>> {
        Box::pin(async move {
            let cached = self.cache.lock().get(hash).cloned();
            if let Some(node) = cached {
                return Ok(node);
            }

            let record = self.read_record(hash).await?.ok_or_else(|| {
                CoreError::TreeCorruption(format!("missing node {}", hash.short()))
            })?;

            let node = match record {
                StoredNode::Leaf {
                    key,
                    value,
                    version,
                } => Node::leaf(key.into(), value.into(), version),
                StoredNode::Inner {
                    height,
                    size,
                    version,
                    left,
                    right,
                } => {
                    let left = self.get_node(&child_hash(&left)?).await?;
                    let right = self.get_node(&child_hash(&right)?).await?;
                    let node = Node::inner(left, right, version);
                    if node.height() != height || node.size() != size {
                        return Err(CoreError::TreeCorruption(format!(
                            "node {} records height {height} size {size}, children give {} {}",
                            hash.short(),
                            node.height(),
                            node.size()
                        )));
                    }
                    node
                }
            };

            if node.hash() != hash {
                return Err(CoreError::TreeCorruption(format!(
                    "node stored under {} hashes to {}",
                    hash.short(),
                    node.hash().short()
                )));
            }

            let node = Arc::new(node);
            self.cache.lock().put(*hash, node.clone());
            Ok(node)
        })
    }

    pub async fn has_node(&self, hash: &Blake3Hash) -> Result<bool> {
        if self.cache.lock().contains(hash) {
            return Ok(true);
        }
        Ok(self.store.has(&node_key(hash)).await?)
    }

    /// Write a single node record
    pub async fn put_node(&self, node: &Arc<Node>) -> Result<()> {
        let bytes = serde_ipld_dagcbor::to_vec(&StoredNode::from_node(node))
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.store.set(&node_key(node.hash()), &bytes).await?;
        self.cache.lock().put(*node.hash(), node.clone());
        Ok(())
    }

    pub async fn delete_node(&self, hash: &Blake3Hash) -> Result<()> {
        self.cache.lock().pop(hash);
        self.store.delete(&node_key(hash)).await?;
        Ok(())
    }

    /// Persist every node of `version` under `node`, children first
    ///
    /// Older nodes are already stored and are not revisited.
    pub fn save_branch<'a>(
        &'a self,
        node: &'a Arc<Node>,
        version: u64,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if node.version() != version {
                return Ok(0);
            }
            let mut saved = 0;
            if let (Some(left), Some(right)) = (node.left(), node.right()) {
                saved += self.save_branch(left, version).await?;
                saved += self.save_branch(right, version).await?;
            }
            self.put_node(node).await?;
            Ok(saved + 1)
        })
    }

    /// Load the tree of `version` whose root hash is `root`
    pub async fn load_tree(&self, root: &Blake3Hash, version: u64) -> Result<ImmutableTree> {
        if *root == empty_root_hash() {
            return Ok(ImmutableTree::empty(version));
        }
        let node = self.get_node(root).await?;
        Ok(ImmutableTree::new(Some(node), version))
    }

    pub async fn save_root(&self, version: u64, root: &Blake3Hash) -> Result<()> {
        self.store.set(&root_key(version), root.as_bytes()).await?;
        Ok(())
    }

    pub async fn get_root(&self, version: u64) -> Result<Option<Blake3Hash>> {
        match self.store.get(&root_key(version)).await? {
            Some(bytes) => Ok(Some(parse_root(&bytes, version)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_root(&self, version: u64) -> Result<()> {
        self.store.delete(&root_key(version)).await?;
        Ok(())
    }

    /// Every stored version with its root hash
    pub async fn roots(&self) -> Result<BTreeMap<u64, Blake3Hash>> {
        let mut roots = BTreeMap::new();
        for (key, value) in self.store.iterate_prefix(&[ROOT_PREFIX]).await? {
            let version = key
                .get(1..)
                .and_then(|b| <[u8; 8]>::try_from(b).ok())
                .map(u64::from_be_bytes)
                .ok_or_else(|| {
                    CoreError::TreeCorruption(format!("bad root key {}", hex::encode(&key)))
                })?;
            roots.insert(version, parse_root(&value, version)?);
        }
        Ok(roots)
    }

    /// Record nodes dropped while building the version after `to_version`
    pub async fn save_orphans(&self, to_version: u64, orphans: &[Orphan]) -> Result<()> {
        for orphan in orphans {
            let key = orphan_key(to_version, orphan.from_version, &orphan.hash);
            self.store.set(&key, &[]).await?;
        }
        Ok(())
    }

    /// All orphan markers as `(to, from, hash)`, ordered by `to`
    pub async fn orphans(&self) -> Result<Vec<(u64, u64, Blake3Hash)>> {
        self.orphans_with_prefix(&[ORPHAN_PREFIX]).await
    }

    async fn orphans_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(u64, u64, Blake3Hash)>> {
        self.store
            .iterate_prefix(prefix)
            .await?
            .iter()
            .map(|(key, _)| parse_orphan_key(key))
            .collect()
    }

    /// Reclaim the nodes whose last referencing version is `version`
    ///
    /// A node still referenced by `predecessor` (the closest remaining older
    /// version) has its marker moved there; every other node is deleted.
    /// Returns the number of deleted nodes.
    #[instrument(skip(self))]
    pub async fn delete_orphans(&self, version: u64, predecessor: Option<u64>) -> Result<usize> {
        let mut prefix = vec![ORPHAN_PREFIX];
        prefix.extend_from_slice(&version.to_be_bytes());

        let mut deleted = 0;
        for (to, from, hash) in self.orphans_with_prefix(&prefix).await? {
            match predecessor {
                Some(p) if p >= from => {
                    self.store.set(&orphan_key(p, from, &hash), &[]).await?;
                }
                _ => {
                    self.delete_node(&hash).await?;
                    deleted += 1;
                }
            }
            self.store.delete(&orphan_key(to, from, &hash)).await?;
        }
        debug!(deleted, "reclaimed orphaned nodes");
        Ok(deleted)
    }

    /// Delete every node newer than `version` reachable from `root`
    ///
    /// Reads raw records so subtrees are never materialised. Returns the
    /// number of deleted nodes.
    pub async fn delete_nodes_newer_than(&self, root: &Blake3Hash, version: u64) -> Result<usize> {
        let mut deleted = 0;
        let mut pending = vec![*root];
        while let Some(hash) = pending.pop() {
            let Some(record) = self.read_record(&hash).await? else {
                // Shared with a newer root already processed
                continue;
            };
            if record.version() <= version {
                continue;
            }
            if let StoredNode::Inner { left, right, .. } = &record {
                pending.push(child_hash(left)?);
                pending.push(child_hash(right)?);
            }
            self.delete_node(&hash).await?;
            deleted += 1;
        }
        trace!(root = %root.short(), deleted, "deleted newer nodes");
        Ok(deleted)
    }

    /// Drop orphan markers that end at or after `version`
    ///
    /// Nodes older than `version` are referenced by `version` again once it
    /// becomes the latest. The hashes of newer nodes are returned for the
    /// caller to delete; the nodes themselves are left in place.
    pub async fn truncate_orphans(&self, version: u64) -> Result<Vec<Blake3Hash>> {
        let mut newer = Vec::new();
        for (to, from, hash) in self.orphans().await? {
            if to < version {
                continue;
            }
            self.store.delete(&orphan_key(to, from, &hash)).await?;
            if from > version {
                newer.push(hash);
            }
        }
        Ok(newer)
    }

    async fn read_record(&self, hash: &Blake3Hash) -> Result<Option<StoredNode>> {
        let Some(bytes) = self.store.get(&node_key(hash)).await? else {
            return Ok(None);
        };
        let record = serde_ipld_dagcbor::from_slice(&bytes)
            .map_err(|e| CoreError::Deserialization(format!("node {}: {e}", hash.short())))?;
        Ok(Some(record))
    }
}

fn node_key(hash: &Blake3Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_BYTE_SIZE);
    key.push(NODE_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn root_key(version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(ROOT_PREFIX);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn orphan_key(to: u64, from: u64, hash: &Blake3Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(ORPHAN_KEY_LEN);
    key.push(ORPHAN_PREFIX);
    key.extend_from_slice(&to.to_be_bytes());
    key.extend_from_slice(&from.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

fn parse_orphan_key(key: &[u8]) -> Result<(u64, u64, Blake3Hash)> {
    let corrupt = || CoreError::TreeCorruption(format!("bad orphan key {}", hex::encode(key)));
    if key.len() != ORPHAN_KEY_LEN {
        return Err(corrupt());
    }
    let to = <[u8; 8]>::try_from(&key[1..9]).map_err(|_| corrupt())?;
    let from = <[u8; 8]>::try_from(&key[9..17]).map_err(|_| corrupt())?;
    let hash = Blake3Hash::from_slice(&key[17..]).map_err(|_| corrupt())?;
    Ok((u64::from_be_bytes(to), u64::from_be_bytes(from), hash))
}

fn parse_root(bytes: &[u8], version: u64) -> Result<Blake3Hash> {
    Blake3Hash::from_slice(bytes)
        .map_err(|e| CoreError::TreeCorruption(format!("root of version {version}: {e}")))
}

fn child_hash(bytes: &[u8]) -> Result<Blake3Hash> {
    Blake3Hash::from_slice(bytes)
        .map_err(|e| CoreError::TreeCorruption(format!("child reference: {e}")))
}
