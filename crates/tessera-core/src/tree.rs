//! Merkle sort tree
//!
//! An integer-indexed authenticated tree over a content-addressed node
//! store. Writes mark the path from root to leaf dirty in memory; `commit`
//! re-serializes exactly the dirty nodes bottom-up and fixes their digests,
//! while untouched subtrees keep their committed digests and are never
//! reserialized. The root digest therefore depends only on the stored id/
//! payload set, never on insertion order.

use crate::codec::NodeIndex;
use crate::error::{Result, TreeError};
use crate::iter::TreeIter;
use crate::node::{align, join_subtrees, Child, Slot, Subtree, TreeNode};
use crate::options::{TreeOptions, CAPACITY};
use crate::policy::DataPolicy;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::mem;
use std::sync::Arc;
use tessera_store::{storage_key, NodeDigest, NodeStore};
use tracing::instrument;

/// An authenticated, versionable map from 60-bit ids to policy payloads
pub struct MerkleSortTree<P: DataPolicy, S: NodeStore> {
    pub(crate) store: Arc<S>,
    pub(crate) options: TreeOptions,
    pub(crate) prefix: Bytes,
    pub(crate) policy: P,
    /// Hydrated root, possibly holding uncommitted content
    pub(crate) root: Option<TreeNode<P::Payload>>,
    /// Digest as of the last commit; unaffected by pending writes
    pub(crate) root_digest: Option<NodeDigest>,
}

impl<P: DataPolicy, S: NodeStore> MerkleSortTree<P, S> {
    /// Create a new empty tree
    pub fn new(store: Arc<S>, options: TreeOptions, prefix: impl Into<Bytes>, policy: P) -> Self {
        Self {
            store,
            options,
            prefix: prefix.into(),
            policy,
            root: None,
            root_digest: None,
        }
    }

    /// Reattach to a previously committed root digest
    pub fn open(
        store: Arc<S>,
        options: TreeOptions,
        prefix: impl Into<Bytes>,
        policy: P,
        root_digest: NodeDigest,
    ) -> Self {
        Self {
            store,
            options,
            prefix: prefix.into(),
            policy,
            root: None,
            root_digest: Some(root_digest),
        }
    }

    /// Digest of the last committed root, if any
    pub fn root_digest(&self) -> Option<NodeDigest> {
        self.root_digest
    }

    /// Whether there are uncommitted writes
    pub fn is_dirty(&self) -> bool {
        self.root.as_ref().is_some_and(TreeNode::has_dirty)
    }

    /// Tree shape options
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Total logical item count (pending writes included)
    pub async fn len(&self) -> Result<u64> {
        match (&self.root, &self.root_digest) {
            (Some(root), _) => Ok(root.total_count()),
            (None, Some(digest)) => Ok(self.load_node(digest).await?.total_count()),
            (None, None) => Ok(0),
        }
    }

    /// Whether the tree holds no items at all
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Lazy ascending cursor over all `(id, item)` pairs, pending writes
    /// included
    pub fn iter(&self) -> TreeIter<'_, P, S> {
        TreeIter::new(self)
    }

    /// Write `data` at `id`.
    ///
    /// Returns `false` when the policy treats the write as a benign no-op.
    /// Fails with a capacity error if `id` is outside the 60-bit address
    /// space, and with whatever the policy raises on a rejected merge.
    #[instrument(level = "debug", skip(self, data))]
    pub async fn set(&mut self, id: u64, data: P::Input) -> Result<bool> {
        if id >= CAPACITY {
            return Err(TreeError::CapacityExceeded {
                id,
                capacity: CAPACITY,
            });
        }
        self.ensure_root().await?;

        let width = self.options.degree.width();
        match self.root.take() {
            None => {
                let mut leaf = TreeNode::new(align(id, width), 1, width);
                let wrote = self.update_leaf_slot(&mut leaf, id, data).await?;
                if wrote {
                    self.root = Some(leaf);
                }
                Ok(wrote)
            }
            Some(mut root) => {
                if root.contains(id) {
                    let result = self.set_in_node(&mut root, id, data).await;
                    self.root = Some(root);
                    result
                } else {
                    self.grow_upward(root, id, data).await
                }
            }
        }
    }

    /// Synthesize a new common ancestor above the current root and a fresh
    /// leaf for an id that falls outside the root's span
    async fn grow_upward(
        &mut self,
        root: TreeNode<P::Payload>,
        id: u64,
        data: P::Input,
    ) -> Result<bool> {
        let width = self.options.degree.width();
        let mut leaf = TreeNode::new(align(id, width), 1, width);
        let wrote = match self.update_leaf_slot(&mut leaf, id, data).await {
            Ok(wrote) => wrote,
            Err(e) => {
                self.root = Some(root);
                return Err(e);
            }
        };
        if !wrote {
            self.root = Some(root);
            return Ok(false);
        }

        let old = Subtree {
            offset: root.offset,
            count: root.total_count(),
            slot: self.preserve(root),
        };
        let new = Subtree {
            offset: leaf.offset,
            count: leaf.total_count(),
            slot: Slot::Dirty(Child::Node(Box::new(leaf))),
        };
        self.root = Some(join_subtrees(old, new, width));
        Ok(true)
    }

    /// Wrap an existing subtree in a slot, keeping its committed digest when
    /// it has no pending content so it is never reserialized
    fn preserve(&self, node: TreeNode<P::Payload>) -> Slot<P::Payload> {
        if !node.has_dirty() {
            if let Some(digest) = self.root_digest {
                return Slot::Clean(
                    Child::Node(Box::new(node)),
                    Bytes::copy_from_slice(digest.as_bytes()),
                );
            }
        }
        Slot::Dirty(Child::Node(Box::new(node)))
    }

    fn set_in_node<'a>(
        &'a self,
        node: &'a mut TreeNode<P::Payload>,
        id: u64,
        data: P::Input,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            debug_assert!(node.contains(id));
            if node.is_leaf() {
                return self.update_leaf_slot(node, id, data).await;
            }

            let slot = node.slot_of(id);
            let width = node.width();
            match mem::replace(&mut node.slots[slot], Slot::Empty) {
                Slot::Empty => {
                    let mut leaf = TreeNode::new(align(id, width), 1, width);
                    let wrote = self.update_leaf_slot(&mut leaf, id, data).await?;
                    if wrote {
                        node.counts[slot] = leaf.total_count();
                        node.slots[slot] = Slot::Dirty(Child::Node(Box::new(leaf)));
                    }
                    Ok(wrote)
                }
                Slot::Stored(bytes) => {
                    let child = match self.load_child(&bytes).await {
                        Ok(child) => child,
                        Err(e) => {
                            node.slots[slot] = Slot::Stored(bytes);
                            return Err(e);
                        }
                    };
                    self.set_in_child(node, slot, Box::new(child), Some(bytes), id, data)
                        .await
                }
                Slot::Clean(Child::Node(child), bytes) => {
                    self.set_in_child(node, slot, child, Some(bytes), id, data)
                        .await
                }
                Slot::Dirty(Child::Node(child)) => {
                    self.set_in_child(node, slot, child, None, id, data).await
                }
                Slot::Clean(Child::Data(_), _) | Slot::Dirty(Child::Data(_)) => Err(
                    TreeError::Decode("payload stored under a path node slot".into()),
                ),
            }
        })
    }

    /// Route a write into an occupied path-node slot: descend when the child
    /// covers the id, otherwise join the child and a fresh leaf under a new
    /// common ancestor inside the slot
    async fn set_in_child(
        &self,
        node: &mut TreeNode<P::Payload>,
        slot: usize,
        mut child: Box<TreeNode<P::Payload>>,
        committed: Option<Bytes>,
        id: u64,
        data: P::Input,
    ) -> Result<bool> {
        let restore = |child: Box<TreeNode<P::Payload>>, committed: Option<Bytes>| match committed {
            Some(bytes) => Slot::Clean(Child::Node(child), bytes),
            None => Slot::Dirty(Child::Node(child)),
        };

        if child.contains(id) {
            match self.set_in_node(&mut child, id, data).await {
                Ok(true) => {
                    node.counts[slot] = child.total_count();
                    node.slots[slot] = Slot::Dirty(Child::Node(child));
                    Ok(true)
                }
                Ok(false) => {
                    node.slots[slot] = restore(child, committed);
                    Ok(false)
                }
                Err(e) => {
                    node.slots[slot] = restore(child, committed);
                    Err(e)
                }
            }
        } else {
            let width = node.width();
            let mut leaf = TreeNode::new(align(id, width), 1, width);
            match self.update_leaf_slot(&mut leaf, id, data).await {
                Ok(true) => {
                    let existing = Subtree {
                        offset: child.offset,
                        count: child.total_count(),
                        slot: match committed {
                            Some(bytes) => Slot::Clean(Child::Node(child), bytes),
                            None => Slot::Dirty(Child::Node(child)),
                        },
                    };
                    let fresh = Subtree {
                        offset: leaf.offset,
                        count: leaf.total_count(),
                        slot: Slot::Dirty(Child::Node(Box::new(leaf))),
                    };
                    let joined = join_subtrees(existing, fresh, width);
                    node.counts[slot] = joined.total_count();
                    node.slots[slot] = Slot::Dirty(Child::Node(Box::new(joined)));
                    Ok(true)
                }
                Ok(false) => {
                    node.slots[slot] = restore(child, committed);
                    Ok(false)
                }
                Err(e) => {
                    node.slots[slot] = restore(child, committed);
                    Err(e)
                }
            }
        }
    }

    /// Apply the data policy to one leaf slot
    async fn update_leaf_slot(
        &self,
        leaf: &mut TreeNode<P::Payload>,
        id: u64,
        data: P::Input,
    ) -> Result<bool> {
        debug_assert!(leaf.is_leaf() && leaf.contains(id));
        let slot = leaf.slot_of(id);

        let (mut current, committed) = match mem::replace(&mut leaf.slots[slot], Slot::Empty) {
            Slot::Empty => (None, None),
            Slot::Stored(bytes) => match self.policy.decode(id, &bytes) {
                Ok(payload) => (Some(payload), Some(bytes)),
                Err(e) => {
                    leaf.slots[slot] = Slot::Stored(bytes);
                    return Err(e);
                }
            },
            Slot::Clean(Child::Data(payload), bytes) => (Some(payload), Some(bytes)),
            Slot::Dirty(Child::Data(payload)) => (Some(payload), None),
            Slot::Clean(Child::Node(_), _) | Slot::Dirty(Child::Node(_)) => {
                return Err(TreeError::Decode(
                    "subtree stored under a leaf node slot".into(),
                ));
            }
        };
        match self.policy.update(id, &mut current, data).await {
            Ok(true) => {
                match current {
                    Some(payload) => {
                        leaf.counts[slot] = self.policy.count(id, &payload);
                        leaf.slots[slot] = Slot::Dirty(Child::Data(payload));
                    }
                    None => {
                        leaf.counts[slot] = 0;
                        leaf.slots[slot] = Slot::Empty;
                    }
                }
                Ok(true)
            }
            unchanged => {
                leaf.slots[slot] = match (current, committed) {
                    (Some(payload), Some(bytes)) => Slot::Clean(Child::Data(payload), bytes),
                    (Some(payload), None) => Slot::Dirty(Child::Data(payload)),
                    (None, Some(bytes)) => Slot::Stored(bytes),
                    (None, None) => Slot::Empty,
                };
                unchanged
            }
        }
    }

    /// Point lookup. Returns `None` for ids that are out of range or have no
    /// stored payload.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, id: u64) -> Result<Option<P::Payload>> {
        if id >= CAPACITY {
            return Ok(None);
        }

        enum Cursor<'a, T> {
            Mem(&'a TreeNode<T>),
            Owned(TreeNode<T>),
        }

        let mut cursor = match (&self.root, &self.root_digest) {
            (Some(root), _) => Cursor::Mem(root),
            (None, Some(digest)) => Cursor::Owned(self.load_node(digest).await?),
            (None, None) => return Ok(None),
        };

        loop {
            match cursor {
                Cursor::Mem(node) => {
                    if !node.contains(id) {
                        return Ok(None);
                    }
                    let slot = node.slot_of(id);
                    if node.is_leaf() {
                        return match &node.slots[slot] {
                            Slot::Empty => Ok(None),
                            Slot::Stored(bytes) => Ok(Some(self.policy.decode(id, bytes)?)),
                            Slot::Clean(Child::Data(payload), _)
                            | Slot::Dirty(Child::Data(payload)) => Ok(Some(payload.clone())),
                            _ => Err(TreeError::Decode(
                                "subtree stored under a leaf node slot".into(),
                            )),
                        };
                    }
                    cursor = match &node.slots[slot] {
                        Slot::Empty => return Ok(None),
                        Slot::Stored(bytes) => Cursor::Owned(self.load_child(bytes).await?),
                        Slot::Clean(Child::Node(child), _) | Slot::Dirty(Child::Node(child)) => {
                            Cursor::Mem(child.as_ref())
                        }
                        _ => {
                            return Err(TreeError::Decode(
                                "payload stored under a path node slot".into(),
                            ))
                        }
                    };
                }
                Cursor::Owned(node) => {
                    if !node.contains(id) {
                        return Ok(None);
                    }
                    let slot = node.slot_of(id);
                    let is_leaf = node.is_leaf();
                    let entry = match &node.slots[slot] {
                        Slot::Empty => return Ok(None),
                        Slot::Stored(bytes) => bytes.clone(),
                        // Loaded nodes only ever hold unloaded slots
                        _ => unreachable!("hydrated slot in a store-loaded node"),
                    };
                    if is_leaf {
                        return Ok(Some(self.policy.decode(id, &entry)?));
                    }
                    cursor = Cursor::Owned(self.load_child(&entry).await?);
                }
            }
        }
    }

    /// Largest id currently holding data, pending writes included
    pub async fn max_id(&self) -> Result<Option<u64>> {
        enum Cursor<'a, T> {
            Mem(&'a TreeNode<T>),
            Owned(TreeNode<T>),
        }

        let mut cursor = match (&self.root, &self.root_digest) {
            (Some(root), _) => Cursor::Mem(root),
            (None, Some(digest)) => Cursor::Owned(self.load_node(digest).await?),
            (None, None) => return Ok(None),
        };

        loop {
            match cursor {
                Cursor::Mem(node) => {
                    let Some(slot) = node.highest_occupied() else {
                        return Ok(None);
                    };
                    if node.is_leaf() {
                        return Ok(Some(node.slot_base(slot)));
                    }
                    cursor = match &node.slots[slot] {
                        Slot::Stored(bytes) => Cursor::Owned(self.load_child(bytes).await?),
                        Slot::Clean(Child::Node(child), _) | Slot::Dirty(Child::Node(child)) => {
                            Cursor::Mem(child.as_ref())
                        }
                        _ => {
                            return Err(TreeError::Decode(
                                "payload stored under a path node slot".into(),
                            ))
                        }
                    };
                }
                Cursor::Owned(node) => {
                    let Some(slot) = node.highest_occupied() else {
                        return Ok(None);
                    };
                    if node.is_leaf() {
                        return Ok(Some(node.slot_base(slot)));
                    }
                    let entry = match &node.slots[slot] {
                        Slot::Stored(bytes) => bytes.clone(),
                        // Loaded nodes only ever hold unloaded slots
                        _ => unreachable!("hydrated slot in a store-loaded node"),
                    };
                    cursor = Cursor::Owned(self.load_child(&entry).await?);
                }
            }
        }
    }

    /// Persist every dirty node bottom-up and fix the root digest.
    ///
    /// Children are always written before the parent that references them.
    /// A no-op when nothing is dirty.
    #[instrument(level = "debug", skip(self))]
    pub async fn commit(&mut self) -> Result<Option<NodeDigest>> {
        if !self.is_dirty() {
            return Ok(self.root_digest);
        }
        let mut root = self.root.take().expect("dirty tree has a root");
        let result = self.commit_node(&mut root).await;
        self.root = Some(root);
        match result {
            Ok(digest) => {
                self.root_digest = Some(digest);
                Ok(Some(digest))
            }
            Err(e) => Err(e),
        }
    }

    fn commit_node<'a>(
        &'a self,
        node: &'a mut TreeNode<P::Payload>,
    ) -> BoxFuture<'a, Result<NodeDigest>> {
        Box::pin(async move {
            for slot in 0..node.slots.len() {
                if !node.slots[slot].is_dirty() {
                    continue;
                }
                let Slot::Dirty(child) = mem::replace(&mut node.slots[slot], Slot::Empty) else {
                    unreachable!()
                };
                match child {
                    Child::Node(mut subtree) => match self.commit_node(&mut subtree).await {
                        Ok(digest) => {
                            node.counts[slot] = subtree.total_count();
                            node.slots[slot] = Slot::Clean(
                                Child::Node(subtree),
                                Bytes::copy_from_slice(digest.as_bytes()),
                            );
                        }
                        Err(e) => {
                            node.slots[slot] = Slot::Dirty(Child::Node(subtree));
                            return Err(e);
                        }
                    },
                    Child::Data(mut payload) => {
                        let id = node.slot_base(slot);
                        if let Err(e) = self.policy.before_commit(id, &mut payload).await {
                            node.slots[slot] = Slot::Dirty(Child::Data(payload));
                            return Err(e);
                        }
                        match self.policy.encode(&payload) {
                            Ok(bytes) => {
                                node.counts[slot] = self.policy.count(id, &payload);
                                node.slots[slot] = Slot::Clean(Child::Data(payload), bytes);
                            }
                            Err(e) => {
                                node.slots[slot] = Slot::Dirty(Child::Data(payload));
                                return Err(e);
                            }
                        }
                    }
                }
            }

            let bytes = node.to_index().to_bytes();
            let digest = self.options.hash_algorithm.digest(&bytes);
            let key = storage_key(&self.prefix, &digest);
            let written = self.store.put_new(&key, bytes).await?;
            if !written && self.options.report_duplicate_write {
                return Err(TreeError::StorageConflict {
                    digest: digest.to_hex(),
                });
            }
            Ok(digest)
        })
    }

    /// Discard all uncommitted writes, restoring the state of the last
    /// commit. Idempotent; a no-op when nothing is dirty.
    #[instrument(level = "debug", skip(self))]
    pub async fn cancel(&mut self) -> Result<()> {
        let Some(root) = self.root.take() else {
            return Ok(());
        };
        if !root.has_dirty() {
            self.root = Some(root);
            return Ok(());
        }
        self.cancel_node(root).await?;
        // Next access re-hydrates lazily from the committed root digest
        Ok(())
    }

    fn cancel_node<'a>(&'a self, node: TreeNode<P::Payload>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let offset = node.offset;
            let step = node.step;
            for (slot, state) in node.slots.into_iter().enumerate() {
                if let Slot::Dirty(child) = state {
                    match child {
                        Child::Node(subtree) => self.cancel_node(*subtree).await?,
                        Child::Data(payload) => {
                            self.policy
                                .after_cancel(offset + slot as u64 * step, payload)
                                .await?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Hydrate the root from its committed digest if it is not in memory yet
    async fn ensure_root(&mut self) -> Result<()> {
        if self.root.is_none() {
            if let Some(digest) = self.root_digest {
                self.root = Some(self.load_node(&digest).await?);
            }
        }
        Ok(())
    }

    /// Load a node by digest from the store, optionally verifying its bytes
    pub(crate) async fn load_node(&self, digest: &NodeDigest) -> Result<TreeNode<P::Payload>> {
        let key = storage_key(&self.prefix, digest);
        let bytes = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| TreeError::MissingNode {
                digest: digest.to_hex(),
            })?;
        if self.options.verify_hash_on_load && self.options.hash_algorithm.digest(&bytes) != *digest
        {
            return Err(TreeError::IntegrityFailure {
                digest: digest.to_hex(),
            });
        }
        let index = NodeIndex::from_bytes(&bytes, self.options.degree.width())?;
        Ok(TreeNode::from_index(index))
    }

    /// Load a child node from the digest bytes kept in a path-node slot
    pub(crate) async fn load_child(&self, entry: &[u8]) -> Result<TreeNode<P::Payload>> {
        let digest = NodeDigest::from_slice(entry).map_err(|e| TreeError::Decode(e.to_string()))?;
        self.load_node(&digest).await
    }
}

impl<P: DataPolicy + Clone, S: NodeStore> Clone for MerkleSortTree<P, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options,
            prefix: self.prefix.clone(),
            policy: self.policy.clone(),
            root: self.root.clone(),
            root_digest: self.root_digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Degree;
    use crate::policy::{OverwriteDataPolicy, PlainDataPolicy};
    use tessera_store::MemoryNodeStore;

    fn plain_tree(
        store: Arc<MemoryNodeStore>,
        options: TreeOptions,
    ) -> MerkleSortTree<PlainDataPolicy, MemoryNodeStore> {
        MerkleSortTree::new(store, options, &b"tree/"[..], PlainDataPolicy)
    }

    fn value(n: u64) -> Bytes {
        Bytes::from(format!("value-{n}").into_bytes())
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());

        let ids = [0u64, 5, 17, 255, 4096, 1 << 40, CAPACITY - 1];
        for &id in &ids {
            assert!(tree.set(id, value(id)).await.unwrap());
        }
        for &id in &ids {
            assert_eq!(tree.get(id).await.unwrap(), Some(value(id)));
        }
        assert_eq!(tree.get(1).await.unwrap(), None);
        assert_eq!(tree.get(1 << 41).await.unwrap(), None);
        assert_eq!(tree.len().await.unwrap(), ids.len() as u64);
    }

    #[tokio::test]
    async fn test_roundtrip_across_degrees() {
        for degree in [
            Degree::Two,
            Degree::Four,
            Degree::Eight,
            Degree::Sixteen,
            Degree::ThirtyTwo,
        ] {
            let options = TreeOptions {
                degree,
                ..TreeOptions::default()
            };
            let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), options);
            for id in [0u64, 1, 33, 1025, CAPACITY - 1] {
                tree.set(id, value(id)).await.unwrap();
            }
            for id in [0u64, 1, 33, 1025, CAPACITY - 1] {
                assert_eq!(tree.get(id).await.unwrap(), Some(value(id)), "degree {degree:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_capacity_boundary() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());

        let err = tree.set(CAPACITY, value(0)).await.unwrap_err();
        assert!(matches!(err, TreeError::CapacityExceeded { .. }));

        assert!(tree.set(CAPACITY - 1, value(1)).await.unwrap());
        assert_eq!(tree.get(CAPACITY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        tree.set(9, value(9)).await.unwrap();

        let err = tree.set(9, value(10)).await.unwrap_err();
        assert!(matches!(err, TreeError::DuplicateKey(9)));
        // The original payload is untouched
        assert_eq!(tree.get(9).await.unwrap(), Some(value(9)));
    }

    #[tokio::test]
    async fn test_overwrite_policy_replaces() {
        let store = Arc::new(MemoryNodeStore::new());
        let mut tree = MerkleSortTree::new(
            store,
            TreeOptions::default(),
            &b"tree/"[..],
            OverwriteDataPolicy,
        );
        tree.set(4, value(4)).await.unwrap();
        tree.set(4, value(5)).await.unwrap();
        assert_eq!(tree.get(4).await.unwrap(), Some(value(5)));
        assert_eq!(tree.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_and_reopen() {
        let store = Arc::new(MemoryNodeStore::new());
        let options = TreeOptions::default();

        let digest = {
            let mut tree = plain_tree(Arc::clone(&store), options);
            tree.set(3, value(3)).await.unwrap();
            tree.set(70_000, value(70_000)).await.unwrap();
            tree.commit().await.unwrap().unwrap()
        };

        let reopened: MerkleSortTree<PlainDataPolicy, _> =
            MerkleSortTree::open(store, options, &b"tree/"[..], PlainDataPolicy, digest);
        assert_eq!(reopened.root_digest(), Some(digest));
        assert_eq!(reopened.get(3).await.unwrap(), Some(value(3)));
        assert_eq!(reopened.get(70_000).await.unwrap(), Some(value(70_000)));
        assert_eq!(reopened.get(4).await.unwrap(), None);
        assert_eq!(reopened.max_id().await.unwrap(), Some(70_000));
    }

    #[tokio::test]
    async fn test_commit_noop_when_clean() {
        let store = Arc::new(MemoryNodeStore::new());
        let mut tree = plain_tree(Arc::clone(&store), TreeOptions::default());

        assert_eq!(tree.commit().await.unwrap(), None);

        tree.set(1, value(1)).await.unwrap();
        let first = tree.commit().await.unwrap();
        let records = store.len();
        let second = tree.commit().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), records);
    }

    #[tokio::test]
    async fn test_root_digest_order_independent() {
        let ids = [12u64, 0, 99_000, 17, 1 << 33, 255, 256];

        let mut forward = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        for &id in &ids {
            forward.set(id, value(id)).await.unwrap();
        }
        let forward_digest = forward.commit().await.unwrap();

        let mut backward = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        for &id in ids.iter().rev() {
            backward.set(id, value(id)).await.unwrap();
        }
        let backward_digest = backward.commit().await.unwrap();

        assert_eq!(forward_digest, backward_digest);

        // A different data set digests differently
        let mut other = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        for &id in &ids[1..] {
            other.set(id, value(id)).await.unwrap();
        }
        assert_ne!(other.commit().await.unwrap(), forward_digest);
    }

    #[tokio::test]
    async fn test_root_digest_unaffected_by_pending_writes() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        tree.set(1, value(1)).await.unwrap();
        let digest = tree.commit().await.unwrap();

        tree.set(2, value(2)).await.unwrap();
        assert_eq!(tree.root_digest(), digest);
        tree.commit().await.unwrap();
        assert_ne!(tree.root_digest(), digest);
    }

    #[tokio::test]
    async fn test_cancel_restores_committed_state() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());

        // Cancel on a never-committed tree empties it
        tree.set(5, value(5)).await.unwrap();
        tree.cancel().await.unwrap();
        assert_eq!(tree.get(5).await.unwrap(), None);
        assert_eq!(tree.root_digest(), None);

        tree.set(5, value(5)).await.unwrap();
        let digest = tree.commit().await.unwrap();

        tree.set(6, value(6)).await.unwrap();
        tree.set(1 << 50, value(0)).await.unwrap();
        tree.cancel().await.unwrap();

        assert_eq!(tree.root_digest(), digest);
        assert_eq!(tree.get(5).await.unwrap(), Some(value(5)));
        assert_eq!(tree.get(6).await.unwrap(), None);
        assert_eq!(tree.get(1 << 50).await.unwrap(), None);
        assert_eq!(tree.max_id().await.unwrap(), Some(5));

        // Cancel with nothing pending is a no-op
        tree.cancel().await.unwrap();
        assert_eq!(tree.get(5).await.unwrap(), Some(value(5)));

        // The tree stays usable after a rollback
        tree.set(6, value(6)).await.unwrap();
        assert_eq!(tree.get(6).await.unwrap(), Some(value(6)));
    }

    #[tokio::test]
    async fn test_historical_roots_stay_readable() {
        let store = Arc::new(MemoryNodeStore::new());
        let options = TreeOptions::default();
        let mut tree = plain_tree(Arc::clone(&store), options);

        tree.set(1, value(1)).await.unwrap();
        let first = tree.commit().await.unwrap().unwrap();

        tree.set(1 << 45, value(2)).await.unwrap();
        let second = tree.commit().await.unwrap().unwrap();
        assert_ne!(first, second);

        // Committed nodes are never mutated, so the old root still
        // dereferences to the old snapshot
        let snapshot: MerkleSortTree<PlainDataPolicy, _> = MerkleSortTree::open(
            Arc::clone(&store),
            options,
            &b"tree/"[..],
            PlainDataPolicy,
            first,
        );
        assert_eq!(snapshot.get(1).await.unwrap(), Some(value(1)));
        assert_eq!(snapshot.get(1 << 45).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identical_content_deduplicates() {
        let store = Arc::new(MemoryNodeStore::new());
        let options = TreeOptions::default();

        let mut first = plain_tree(Arc::clone(&store), options);
        first.set(0, value(0)).await.unwrap();
        let digest_a = first.commit().await.unwrap();

        let records = store.len();

        // Byte-identical content from a second tree is a silent no-op write
        let mut second = plain_tree(Arc::clone(&store), options);
        second.set(0, value(0)).await.unwrap();
        let digest_b = second.commit().await.unwrap();

        assert_eq!(digest_a, digest_b);
        assert_eq!(store.len(), records);
    }

    #[tokio::test]
    async fn test_report_duplicate_write_conflict() {
        let store = Arc::new(MemoryNodeStore::new());
        let options = TreeOptions {
            report_duplicate_write: true,
            ..TreeOptions::default()
        };

        let mut first = plain_tree(Arc::clone(&store), options);
        first.set(0, value(0)).await.unwrap();
        first.commit().await.unwrap();

        let mut second = plain_tree(Arc::clone(&store), options);
        second.set(0, value(0)).await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, TreeError::StorageConflict { .. }));
    }

    #[tokio::test]
    async fn test_verify_hash_on_load_detects_tampering() {
        let store = Arc::new(MemoryNodeStore::new());
        let options = TreeOptions {
            verify_hash_on_load: true,
            ..TreeOptions::default()
        };

        // A valid leaf stored under the digest of something else entirely
        let leaf = NodeIndex {
            offset: 0,
            step: 1,
            counts: {
                let mut counts = vec![0; 16];
                counts[0] = 1;
                counts
            },
            entries: {
                let mut entries = vec![Bytes::new(); 16];
                entries[0] = value(0);
                entries
            },
        };
        let bogus_digest = options.hash_algorithm.digest(b"some other content");
        let key = storage_key(b"tree/", &bogus_digest);
        store.put_new(&key, leaf.to_bytes()).await.unwrap();

        let tree: MerkleSortTree<PlainDataPolicy, _> = MerkleSortTree::open(
            store,
            options,
            &b"tree/"[..],
            PlainDataPolicy,
            bogus_digest,
        );
        let err = tree.get(0).await.unwrap_err();
        assert!(matches!(err, TreeError::IntegrityFailure { .. }));
    }

    #[tokio::test]
    async fn test_missing_node_is_an_error() {
        let store = Arc::new(MemoryNodeStore::new());
        let digest = TreeOptions::default().hash_algorithm.digest(b"never stored");
        let tree: MerkleSortTree<PlainDataPolicy, _> = MerkleSortTree::open(
            store,
            TreeOptions::default(),
            &b"tree/"[..],
            PlainDataPolicy,
            digest,
        );
        let err = tree.get(0).await.unwrap_err();
        assert!(matches!(err, TreeError::MissingNode { .. }));
    }

    #[tokio::test]
    async fn test_max_id_tracks_pending_and_committed() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        assert_eq!(tree.max_id().await.unwrap(), None);

        tree.set(10, value(10)).await.unwrap();
        assert_eq!(tree.max_id().await.unwrap(), Some(10));

        tree.set(99_999, value(0)).await.unwrap();
        assert_eq!(tree.max_id().await.unwrap(), Some(99_999));

        tree.commit().await.unwrap();
        assert_eq!(tree.max_id().await.unwrap(), Some(99_999));
    }

    #[tokio::test]
    async fn test_iterator_ascending_and_complete() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        let mut ids = vec![300u64, 2, 40_000, 17, 1 << 35, 0, 31];
        for &id in &ids {
            tree.set(id, value(id)).await.unwrap();
        }
        ids.sort_unstable();

        let mut seen = Vec::new();
        let mut iter = tree.iter();
        while let Some((id, item)) = iter.next().await.unwrap() {
            assert_eq!(item, value(id));
            seen.push(id);
        }
        assert_eq!(seen, ids);

        // Exhausted cursors stay exhausted
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_iterator_survives_commit_boundary() {
        let store = Arc::new(MemoryNodeStore::new());
        let options = TreeOptions::default();
        let digest = {
            let mut tree = plain_tree(Arc::clone(&store), options);
            for id in [1u64, 2, 3] {
                tree.set(id, value(id)).await.unwrap();
            }
            tree.commit().await.unwrap().unwrap()
        };

        // Iteration over a freshly reopened tree walks store-loaded nodes
        let tree: MerkleSortTree<PlainDataPolicy, _> =
            MerkleSortTree::open(store, options, &b"tree/"[..], PlainDataPolicy, digest);
        let mut iter = tree.iter();
        let mut seen = Vec::new();
        while let Some((id, _)) = iter.next().await.unwrap() {
            seen.push(id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_iterator_skip_jumps_subtrees() {
        let mut tree = plain_tree(Arc::new(MemoryNodeStore::new()), TreeOptions::default());
        let ids: Vec<u64> = (0..40).map(|i| i * 1_000).collect();
        for &id in &ids {
            tree.set(id, value(id)).await.unwrap();
        }

        let mut iter = tree.iter();
        assert_eq!(iter.skip(25).await.unwrap(), 25);
        let (id, _) = iter.next().await.unwrap().unwrap();
        assert_eq!(id, ids[25]);

        // Skipping past the end reports how many were left
        assert_eq!(iter.skip(1_000).await.unwrap(), 14);
        assert!(iter.next().await.unwrap().is_none());
    }
}
