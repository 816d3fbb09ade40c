//! Versioned tree with persistence
//!
//! A [`VersionedTree`] owns the single mutable [`WorkingTree`] and the
//! history of saved versions. Saving freezes the working state into an
//! [`ImmutableTree`], writes its new nodes to the store and continues from
//! it. Old versions can be loaded, queried and proven against, and deleted
//! once no longer needed.

use crate::avl::{diff_snapshots, ImmutableTree, KeyValueChange, WorkingTree};
use crate::config::TreeConfig;
use crate::nodedb::NodeDb;
use crate::proof::TreeProof;
use crate::{CoreError, Result};
use arbor_crypto::Blake3Hash;
use arbor_store::KvStore;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A persistent, versioned, authenticated key-value tree
pub struct VersionedTree<S: KvStore> {
    ndb: NodeDb<S>,
    working: WorkingTree,
    /// Saved versions and their root hashes
    roots: BTreeMap<u64, Blake3Hash>,
    /// Saved versions already materialised in memory
    snapshots: RwLock<BTreeMap<u64, ImmutableTree>>,
    /// Version the working tree was loaded from or last saved as
    base: Option<u64>,
    config: TreeConfig,
}

impl<S: KvStore> VersionedTree<S> {
    /// Create a tree with no history
    ///
    /// Use [`Self::open`] to continue from versions already in the store.
    pub fn new(store: Arc<S>, config: TreeConfig) -> Self {
        Self {
            ndb: NodeDb::new(store, config.cache_size),
            working: WorkingTree::new(config.initial_version),
            roots: BTreeMap::new(),
            snapshots: RwLock::new(BTreeMap::new()),
            base: None,
            config,
        }
    }

    /// Open a tree from the store, continuing from its latest version
    #[instrument(skip(store, config))]
    pub async fn open(store: Arc<S>, config: TreeConfig) -> Result<Self> {
        let mut tree = Self::new(store, config);
        tree.roots = tree.ndb.roots().await?;

        if let Some((&latest, root)) = tree.roots.iter().next_back() {
            let snapshot = tree.ndb.load_tree(root, latest).await?;
            tree.working = WorkingTree::from_snapshot(&snapshot);
            tree.snapshots.write().insert(latest, snapshot);
            tree.base = Some(latest);
        }
        info!(
            versions = tree.roots.len(),
            latest = ?tree.latest_version(),
            "opened versioned tree"
        );
        Ok(tree)
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn node_db(&self) -> &NodeDb<S> {
        &self.ndb
    }

    /// Read the working (unsaved) state
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.working.get(key)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.working.has(key)
    }

    /// Value with a proof against [`Self::working_hash`]
    pub fn get_with_proof(&self, key: &[u8]) -> (Option<Bytes>, TreeProof) {
        self.working.get_with_proof(key)
    }

    /// Insert or update a key; `true` if a value was replaced
    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<bool> {
        self.working.set(key, value)
    }

    /// Remove a key and return its value
    pub fn remove(&mut self, key: &[u8]) -> Result<Bytes> {
        self.working.remove(key)
    }

    /// Discard changes since the last save or load
    pub fn rollback(&mut self) {
        self.working.rollback();
    }

    /// Root hash of the working state
    pub fn working_hash(&self) -> Blake3Hash {
        self.working.working_hash()
    }

    /// Version the next save will produce
    pub fn working_version(&self) -> u64 {
        self.working.version()
    }

    /// Number of keys in the working state
    pub fn size(&self) -> u64 {
        self.working.size()
    }

    pub fn is_dirty(&self) -> bool {
        self.working.is_dirty()
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.roots.keys().next_back().copied()
    }

    pub fn available_versions(&self) -> Vec<u64> {
        self.roots.keys().copied().collect()
    }

    pub fn version_exists(&self, version: u64) -> bool {
        self.roots.contains_key(&version)
    }

    /// Root hash of a saved version
    pub fn root_hash(&self, version: u64) -> Option<Blake3Hash> {
        self.roots.get(&version).copied()
    }

    /// Snapshot of the latest saved version
    pub fn latest(&self) -> Option<ImmutableTree> {
        let version = self.latest_version()?;
        self.snapshots.read().get(&version).cloned()
    }

    /// Persist the working state as the next version
    ///
    /// Writes the new nodes, then the root record, then the orphan markers,
    /// so an interrupted save never leaves a root pointing at missing nodes.
    /// Saving content identical to what the store already holds for this
    /// version is a no-op that still advances the working tree.
    #[instrument(skip(self), fields(version = self.working.version()))]
    pub async fn save_version(&mut self) -> Result<(Blake3Hash, u64)> {
        let version = self.working.version();
        let hash = self.working.working_hash();

        if let Some(existing) = self.ndb.get_root(version).await? {
            if existing != hash {
                warn!(
                    stored = %existing.short(),
                    working = %hash.short(),
                    "version already saved with different content"
                );
                return Err(CoreError::VersionConflict {
                    version,
                    reason: format!(
                        "stored root {} differs from working root {}",
                        existing.short(),
                        hash.short()
                    ),
                });
            }
            // An earlier attempt may have stopped after the root record
            self.save_orphans(version).await?;
            debug!("version already saved with identical content");
            self.finish_save(version, hash);
            return Ok((hash, version));
        }

        if let Some(latest) = self.latest_version() {
            if version <= latest {
                warn!(latest, "save would fork history");
                return Err(CoreError::VersionConflict {
                    version,
                    reason: format!("latest saved version is {latest}"),
                });
            }
        }

        let saved = match self.working.root() {
            Some(root) => self.ndb.save_branch(root, version).await?,
            None => 0,
        };
        self.ndb.save_root(version, &hash).await?;
        self.save_orphans(version).await?;

        debug!(
            nodes = saved,
            orphans = self.working.orphans().len(),
            root = %hash.short(),
            "saved version"
        );
        self.finish_save(version, hash);
        Ok((hash, version))
    }

    /// Record the nodes the working tree dropped from the previous version
    async fn save_orphans(&self, version: u64) -> Result<()> {
        let orphans = self.working.orphans();
        if orphans.is_empty() {
            return Ok(());
        }
        self.ndb.save_orphans(version - 1, orphans).await
    }

    fn finish_save(&mut self, version: u64, hash: Blake3Hash) {
        let snapshot = self.working.mark_saved();
        self.roots.insert(version, hash);
        self.snapshots.write().insert(version, snapshot);
        self.base = Some(version);
    }

    /// Snapshot of a saved version, loading it from the store if needed
    #[instrument(skip(self))]
    pub async fn load_version(&self, version: u64) -> Result<ImmutableTree> {
        let cached = self.snapshots.read().get(&version).cloned();
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }

        let root = match self.roots.get(&version) {
            Some(root) => *root,
            None => self
                .ndb
                .get_root(version)
                .await?
                .ok_or(CoreError::VersionNotFound(version))?,
        };
        let snapshot = self.ndb.load_tree(&root, version).await?;
        debug!(size = snapshot.size(), "loaded version from store");
        self.snapshots.write().insert(version, snapshot.clone());
        Ok(snapshot)
    }

    /// Read a key as of a saved version
    pub async fn get_versioned(&self, key: &[u8], version: u64) -> Result<Option<Bytes>> {
        Ok(self.load_version(version).await?.get(key))
    }

    /// Value with a proof against the root of a saved version
    pub async fn get_versioned_with_proof(
        &self,
        key: &[u8],
        version: u64,
    ) -> Result<(Option<Bytes>, TreeProof)> {
        Ok(self.load_version(version).await?.get_with_proof(key))
    }

    /// Key-level changes from version `from` to version `to`
    pub async fn diff_versions(&self, from: u64, to: u64) -> Result<Vec<KeyValueChange>> {
        let base = self.load_version(from).await?;
        let other = self.load_version(to).await?;
        Ok(diff_snapshots(&base, &other))
    }

    /// Delete a saved version and reclaim nodes only it referenced
    ///
    /// The latest version and the version the working tree is based on
    /// cannot be deleted.
    #[instrument(skip(self))]
    pub async fn delete_version(&mut self, version: u64) -> Result<()> {
        if self.latest_version() == Some(version) || self.base == Some(version) {
            warn!("refusing to delete a version in use");
            return Err(CoreError::VersionInUse(version));
        }
        if !self.roots.contains_key(&version) {
            return Err(CoreError::VersionNotFound(version));
        }

        let predecessor = self.roots.range(..version).next_back().map(|(&v, _)| v);
        // Root first: a failure below leaks nodes but never breaks a version
        self.ndb.delete_root(version).await?;
        self.roots.remove(&version);
        self.snapshots.write().remove(&version);

        let deleted = self.ndb.delete_orphans(version, predecessor).await?;
        debug!(deleted, ?predecessor, "deleted version");
        Ok(())
    }

    /// Delete every version after `version` and continue from it
    ///
    /// Root records go first, then the orphan markers of the discarded
    /// versions, and only then their nodes. The working tree is re-based once
    /// no marker can reclaim a node it uses. A failure before that leaves the
    /// working tree on its old base; a failure after it only leaks nodes.
    /// Unsaved changes are dropped.
    #[instrument(skip(self))]
    pub async fn load_version_for_overwriting(&mut self, version: u64) -> Result<()> {
        if !self.roots.contains_key(&version) {
            return Err(CoreError::VersionNotFound(version));
        }
        let snapshot = self.load_version(version).await?;

        let newer: Vec<(u64, Blake3Hash)> = self
            .roots
            .range(version + 1..)
            .map(|(&v, &root)| (v, root))
            .collect();

        // Oldest first, so the working tree's base is the last root to go
        for (v, _) in &newer {
            self.ndb.delete_root(*v).await?;
            self.roots.remove(v);
            self.snapshots.write().remove(v);
        }
        let orphaned = self.ndb.truncate_orphans(version).await?;

        self.working = WorkingTree::from_snapshot(&snapshot);
        self.base = Some(version);

        let mut deleted = 0;
        for (_, root) in newer.iter().rev() {
            deleted += self.ndb.delete_nodes_newer_than(root, version).await?;
        }
        for hash in &orphaned {
            self.ndb.delete_node(hash).await?;
        }
        deleted += orphaned.len();

        info!(
            discarded = newer.len(),
            deleted, "reset to version for overwriting"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avl::empty_root_hash;
    use arbor_store::{MemoryKvStore, StoreError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use test_log::test;

    fn memory_tree() -> (Arc<MemoryKvStore>, VersionedTree<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        let tree = VersionedTree::new(store.clone(), TreeConfig::default());
        (store, tree)
    }

    #[test(tokio::test)]
    async fn test_save_and_load_versions() {
        let (_, mut tree) = memory_tree();
        tree.set("a", "1").unwrap();
        let (h1, v1) = tree.save_version().await.unwrap();
        assert_eq!(v1, 1);

        tree.set("a", "2").unwrap();
        tree.set("b", "3").unwrap();
        let (h2, v2) = tree.save_version().await.unwrap();
        assert_eq!(v2, 2);
        assert_ne!(h1, h2);

        assert_eq!(tree.get_versioned(b"a", 1).await.unwrap(), Some(Bytes::from("1")));
        assert_eq!(tree.get_versioned(b"b", 1).await.unwrap(), None);
        assert_eq!(tree.get_versioned(b"a", 2).await.unwrap(), Some(Bytes::from("2")));
        assert_eq!(tree.available_versions(), vec![1, 2]);
        assert_eq!(tree.latest().unwrap().root_hash(), h2);

        let err = tree.load_version(9).await.unwrap_err();
        assert!(matches!(err, CoreError::VersionNotFound(9)));
    }

    #[test(tokio::test)]
    async fn test_initial_version() {
        let store = Arc::new(MemoryKvStore::new());
        let config = TreeConfig::default().with_initial_version(100);
        let mut tree = VersionedTree::new(store, config);
        tree.set("k", "v").unwrap();
        assert_eq!(tree.save_version().await.unwrap().1, 100);
        assert_eq!(tree.working_version(), 101);
    }

    #[test(tokio::test)]
    async fn test_empty_version() {
        let (store, mut tree) = memory_tree();
        let (hash, version) = tree.save_version().await.unwrap();
        assert_eq!(hash, empty_root_hash());

        let reopened = VersionedTree::open(store, TreeConfig::default()).await.unwrap();
        assert!(reopened.load_version(version).await.unwrap().is_empty());
        assert_eq!(reopened.working_version(), version + 1);
    }

    #[test(tokio::test)]
    async fn test_open_continues_from_latest() {
        let (store, mut tree) = memory_tree();
        for i in 0u32..50 {
            tree.set(i.to_be_bytes().to_vec(), i.to_le_bytes().to_vec())
                .unwrap();
        }
        tree.save_version().await.unwrap();
        tree.remove(&7u32.to_be_bytes()).unwrap();
        let (hash, _) = tree.save_version().await.unwrap();
        drop(tree);

        let mut reopened = VersionedTree::open(store, TreeConfig::default()).await.unwrap();
        assert_eq!(reopened.latest_version(), Some(2));
        assert_eq!(reopened.working_hash(), hash);
        assert_eq!(reopened.size(), 49);
        assert!(!reopened.is_dirty());

        reopened.set("new", "x").unwrap();
        assert_eq!(reopened.save_version().await.unwrap().1, 3);
    }

    #[test(tokio::test)]
    async fn test_saved_proofs_verify() {
        let (_, mut tree) = memory_tree();
        for k in [0x17u8, 0x42, 0x99] {
            tree.set(vec![k], vec![k; 8]).unwrap();
        }
        let (root, version) = tree.save_version().await.unwrap();
        tree.set(vec![0x38], "later").unwrap();

        let (value, proof) = tree.get_versioned_with_proof(&[0x38], version).await.unwrap();
        assert!(value.is_none());
        proof.verify(&[0x38], None, &root).unwrap();

        let (value, proof) = tree.get_with_proof(&[0x38]);
        proof
            .verify(&[0x38], value.as_deref(), &tree.working_hash())
            .unwrap();
    }

    #[test(tokio::test)]
    async fn test_identical_resave_is_idempotent() {
        let store = Arc::new(MemoryKvStore::new());
        let mut a = VersionedTree::new(store.clone(), TreeConfig::default());
        let mut b = VersionedTree::new(store.clone(), TreeConfig::default());

        a.set("k", "v").unwrap();
        b.set("k", "v").unwrap();
        let saved_a = a.save_version().await.unwrap();
        let entries = store.len();

        let saved_b = b.save_version().await.unwrap();
        assert_eq!(saved_a, saved_b);
        assert_eq!(store.len(), entries);
        assert_eq!(b.working_version(), 2);
    }

    #[test(tokio::test)]
    async fn test_conflicting_save_is_rejected() {
        let store = Arc::new(MemoryKvStore::new());
        let mut a = VersionedTree::new(store.clone(), TreeConfig::default());
        let mut b = VersionedTree::new(store.clone(), TreeConfig::default());

        a.set("k", "v").unwrap();
        b.set("k", "other").unwrap();
        a.save_version().await.unwrap();

        let err = b.save_version().await.unwrap_err();
        assert!(matches!(err, CoreError::VersionConflict { version: 1, .. }));
        // Working state is untouched and can be rolled back
        assert_eq!(b.get(b"k"), Some(Bytes::from("other")));
        assert_eq!(b.working_version(), 1);
    }

    #[test(tokio::test)]
    async fn test_delete_version_keeps_shared_nodes() {
        let (store, mut tree) = memory_tree();
        for k in 0u8..32 {
            tree.set(vec![k], vec![k]).unwrap();
        }
        tree.save_version().await.unwrap();

        tree.set(vec![3u8], "three").unwrap();
        tree.remove(&[20]).unwrap();
        let (h2, _) = tree.save_version().await.unwrap();

        tree.set(vec![40u8], "forty").unwrap();
        let (h3, _) = tree.save_version().await.unwrap();

        let nodes_before = store.count_prefix(b"n");
        tree.delete_version(1).await.unwrap();
        assert!(store.count_prefix(b"n") < nodes_before);
        assert_eq!(tree.available_versions(), vec![2, 3]);

        // Reload everything from the store alone
        let reopened = VersionedTree::open(store.clone(), TreeConfig::default())
            .await
            .unwrap();
        let v2 = reopened.load_version(2).await.unwrap();
        let v3 = reopened.load_version(3).await.unwrap();
        assert_eq!(v2.root_hash(), h2);
        assert_eq!(v3.root_hash(), h3);
        assert_eq!(v2.get(&[3]), Some(Bytes::from("three")));
        assert_eq!(v2.get(&[20]), None);

        for k in 0u8..41 {
            let (value, proof) = v2.get_with_proof(&[k]);
            proof.verify(&[k], value.as_deref(), &h2).unwrap();
        }

        let err = reopened.load_version(1).await.unwrap_err();
        assert!(matches!(err, CoreError::VersionNotFound(1)));
    }

    #[test(tokio::test)]
    async fn test_deleting_every_old_version_leaves_only_live_nodes() {
        let (store, mut tree) = memory_tree();
        for round in 0u8..5 {
            for k in 0u8..16 {
                tree.set(vec![k], vec![k, round]).unwrap();
            }
            tree.save_version().await.unwrap();
        }
        for v in 1..5 {
            tree.delete_version(v).await.unwrap();
        }

        // 16 leaves and 15 inner nodes survive, with no orphan markers left
        assert_eq!(store.count_prefix(b"n"), 31);
        assert_eq!(store.count_prefix(b"o"), 0);
        assert_eq!(store.count_prefix(b"r"), 1);
    }

    #[test(tokio::test)]
    async fn test_delete_version_errors() {
        let (_, mut tree) = memory_tree();
        tree.set("a", "1").unwrap();
        tree.save_version().await.unwrap();
        tree.set("a", "2").unwrap();
        tree.save_version().await.unwrap();

        assert!(matches!(
            tree.delete_version(2).await,
            Err(CoreError::VersionInUse(2))
        ));
        assert!(matches!(
            tree.delete_version(7).await,
            Err(CoreError::VersionNotFound(7))
        ));
        tree.delete_version(1).await.unwrap();
        assert!(matches!(
            tree.delete_version(1).await,
            Err(CoreError::VersionNotFound(1))
        ));
    }

    #[test(tokio::test)]
    async fn test_load_version_for_overwriting() {
        let (store, mut tree) = memory_tree();
        for k in 0u8..16 {
            tree.set(vec![k], vec![k]).unwrap();
        }
        let (h1, _) = tree.save_version().await.unwrap();
        let nodes_v1 = store.count_prefix(b"n");

        tree.set(vec![1u8], "x").unwrap();
        tree.remove(&[9]).unwrap();
        tree.save_version().await.unwrap();
        tree.set(vec![30u8], "y").unwrap();
        tree.save_version().await.unwrap();

        tree.load_version_for_overwriting(1).await.unwrap();
        assert_eq!(tree.available_versions(), vec![1]);
        assert_eq!(tree.working_hash(), h1);
        assert_eq!(tree.working_version(), 2);
        assert_eq!(store.count_prefix(b"n"), nodes_v1);
        assert_eq!(store.count_prefix(b"o"), 0);

        // Version 2 can now be written with different content
        tree.set(vec![2u8], "z").unwrap();
        let (_, v) = tree.save_version().await.unwrap();
        assert_eq!(v, 2);
        assert_eq!(tree.get_versioned(&[9], 2).await.unwrap(), Some(Bytes::from(vec![9u8])));
    }

    #[test(tokio::test)]
    async fn test_rollback_restores_saved_state() {
        let (_, mut tree) = memory_tree();
        tree.set("a", "1").unwrap();
        let (h1, _) = tree.save_version().await.unwrap();

        tree.set("a", "2").unwrap();
        tree.remove(b"a").unwrap();
        tree.rollback();
        assert_eq!(tree.working_hash(), h1);
        assert_eq!(tree.get(b"a"), Some(Bytes::from("1")));
    }

    #[test(tokio::test)]
    async fn test_diff_versions() {
        let (_, mut tree) = memory_tree();
        tree.set("a", "1").unwrap();
        tree.save_version().await.unwrap();
        tree.set("b", "2").unwrap();
        tree.save_version().await.unwrap();

        let changes = tree.diff_versions(1, 2).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, Bytes::from("b"));
    }

    /// Store that can fail every operation, or start failing writes or
    /// deletes after a number of successful ones
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryKvStore,
        failing: AtomicBool,
        sets_left: Mutex<Option<usize>>,
        deletes_left: Mutex<Option<usize>>,
    }

    impl FlakyStore {
        fn offline() -> StoreError {
            StoreError::Unavailable("backend offline".to_string())
        }

        fn check(&self) -> arbor_store::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Self::offline());
            }
            Ok(())
        }

        fn spend(budget: &Mutex<Option<usize>>) -> arbor_store::Result<()> {
            match budget.lock().as_mut() {
                Some(0) => Err(Self::offline()),
                Some(left) => {
                    *left -= 1;
                    Ok(())
                }
                None => Ok(()),
            }
        }

        fn heal(&self) {
            self.failing.store(false, Ordering::SeqCst);
            *self.sets_left.lock() = None;
            *self.deletes_left.lock() = None;
        }
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn get(&self, key: &[u8]) -> arbor_store::Result<Option<Bytes>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &[u8], value: &[u8]) -> arbor_store::Result<()> {
            self.check()?;
            Self::spend(&self.sets_left)?;
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &[u8]) -> arbor_store::Result<()> {
            self.check()?;
            Self::spend(&self.deletes_left)?;
            self.inner.delete(key).await
        }

        async fn has(&self, key: &[u8]) -> arbor_store::Result<bool> {
            self.check()?;
            self.inner.has(key).await
        }

        async fn iterate_prefix(&self, prefix: &[u8]) -> arbor_store::Result<Vec<(Bytes, Bytes)>> {
            self.check()?;
            self.inner.iterate_prefix(prefix).await
        }
    }

    /// Open the store afresh and check every version loads and proves
    async fn assert_store_is_sound(store: &Arc<FlakyStore>) -> VersionedTree<FlakyStore> {
        let reopened = VersionedTree::open(store.clone(), TreeConfig::default())
            .await
            .unwrap();
        for version in reopened.available_versions() {
            let snapshot = reopened.load_version(version).await.unwrap();
            let root = snapshot.root_hash();
            assert_eq!(Some(root), reopened.root_hash(version));
            for k in 0u8..20 {
                let (value, proof) = snapshot.get_with_proof(&[k]);
                proof.verify(&[k], value.as_deref(), &root).unwrap();
            }
        }
        reopened
    }

    /// Three versions over 16 keys, every value rewritten in each one
    async fn three_versions(store: &Arc<FlakyStore>) -> VersionedTree<FlakyStore> {
        let mut tree = VersionedTree::new(store.clone(), TreeConfig::default());
        for round in 0u8..3 {
            for k in 0u8..16 {
                tree.set(vec![k], vec![k, round]).unwrap();
            }
            tree.save_version().await.unwrap();
        }
        tree
    }

    #[test(tokio::test)]
    async fn test_store_errors_propagate() {
        let store = Arc::new(FlakyStore::default());
        let mut tree = VersionedTree::new(store.clone(), TreeConfig::default());
        tree.set("a", "1").unwrap();
        tree.save_version().await.unwrap();
        tree.set("b", "2").unwrap();

        store.failing.store(true, Ordering::SeqCst);
        let err = tree.save_version().await.unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Unavailable(_))));
        // Nothing advanced
        assert_eq!(tree.working_version(), 2);
        assert_eq!(tree.available_versions(), vec![1]);

        store.failing.store(false, Ordering::SeqCst);
        let (_, v) = tree.save_version().await.unwrap();
        assert_eq!(v, 2);

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            VersionedTree::open(store.clone(), TreeConfig::default()).await,
            Err(CoreError::Store(_))
        ));
    }

    #[test(tokio::test)]
    async fn test_interrupted_save_can_be_retried() {
        // 31 nodes, one root record and 31 orphan markers
        for budget in 0..63 {
            let store = Arc::new(FlakyStore::default());
            let mut tree = VersionedTree::new(store.clone(), TreeConfig::default());
            for k in 0u8..16 {
                tree.set(vec![k], vec![k]).unwrap();
            }
            tree.save_version().await.unwrap();
            for k in 0u8..16 {
                tree.set(vec![k], vec![k, 2]).unwrap();
            }
            let expected = tree.working_hash();

            *store.sets_left.lock() = Some(budget);
            let err = tree.save_version().await.unwrap_err();
            assert!(matches!(err, CoreError::Store(_)), "budget {budget}: {err}");
            assert_eq!(tree.working_version(), 2);

            store.heal();
            assert_eq!(tree.save_version().await.unwrap(), (expected, 2));
            assert_eq!(store.inner.count_prefix(b"o"), 31, "budget {budget}");

            // Every node of version 1 is reclaimed
            tree.delete_version(1).await.unwrap();
            assert_eq!(store.inner.count_prefix(b"n"), 31, "budget {budget}");
            assert_eq!(store.inner.count_prefix(b"o"), 0, "budget {budget}");
            assert_store_is_sound(&store).await;
        }
    }

    #[test(tokio::test)]
    async fn test_interrupted_delete_never_breaks_other_versions() {
        let mut budget = 0;
        loop {
            let store = Arc::new(FlakyStore::default());
            let mut tree = three_versions(&store).await;

            *store.deletes_left.lock() = Some(budget);
            let result = tree.delete_version(2).await;
            store.heal();
            assert_store_is_sound(&store).await;
            if result.is_ok() {
                break;
            }
            // The root record goes first, so version 2 is either fully
            // listed or gone
            assert_eq!(tree.version_exists(2), store.inner.count_prefix(b"r") == 3);

            // The remaining history can still be pruned down to the latest
            for version in tree.available_versions() {
                if Some(version) != tree.latest_version() {
                    tree.delete_version(version).await.unwrap();
                }
            }
            let reopened = assert_store_is_sound(&store).await;
            assert_eq!(reopened.available_versions(), vec![3]);
            budget += 1;
        }
        assert!(budget > 0);
    }

    #[test(tokio::test)]
    async fn test_interrupted_overwrite_never_breaks_stored_versions() {
        let mut budget = 0;
        loop {
            let store = Arc::new(FlakyStore::default());
            let mut tree = three_versions(&store).await;
            let h1 = tree.root_hash(1).unwrap();

            *store.deletes_left.lock() = Some(budget);
            let result = tree.load_version_for_overwriting(1).await;
            store.heal();
            assert_store_is_sound(&store).await;

            // Whatever state the tree was left in, it can keep saving
            tree.set(vec![0x40u8], "after").unwrap();
            let (hash, version) = tree.save_version().await.unwrap();
            let reopened = assert_store_is_sound(&store).await;
            assert_eq!(reopened.latest_version(), Some(version));
            assert_eq!(reopened.root_hash(version), Some(hash));
            assert_eq!(reopened.root_hash(1), Some(h1));

            if result.is_ok() {
                assert_eq!(version, 2);
                assert_eq!(reopened.available_versions(), vec![1, 2]);
                break;
            }
            budget += 1;
        }
        assert!(budget > 0);
    }
}
