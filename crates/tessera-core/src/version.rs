//! Per-key version histories
//!
//! A key version tree is a Merkle sort tree whose ids are version numbers
//! and whose payloads are the value bytes for one key. The plain data policy
//! makes histories append-only: a version, once written, can never be
//! rewritten. Version numbers are caller-supplied; contiguity is the
//! caller's contract.

use crate::error::Result;
use crate::options::TreeOptions;
use crate::policy::PlainDataPolicy;
use crate::tree::MerkleSortTree;
use bytes::Bytes;
use std::sync::Arc;
use tessera_store::{NodeDigest, NodeStore};

/// Append-only value history for a single key
pub struct KeyVersionTree<S: NodeStore> {
    tree: MerkleSortTree<PlainDataPolicy, S>,
}

impl<S: NodeStore> KeyVersionTree<S> {
    /// Create an empty history
    pub fn new(store: Arc<S>, options: TreeOptions, prefix: impl Into<Bytes>) -> Self {
        Self {
            tree: MerkleSortTree::new(store, options, prefix, PlainDataPolicy),
        }
    }

    /// Reattach to a previously committed history
    pub fn open(
        store: Arc<S>,
        options: TreeOptions,
        prefix: impl Into<Bytes>,
        root_digest: NodeDigest,
    ) -> Self {
        Self {
            tree: MerkleSortTree::open(store, options, prefix, PlainDataPolicy, root_digest),
        }
    }

    /// Highest version written so far, or `None` for an empty history
    pub async fn latest_version(&self) -> Result<Option<u64>> {
        self.tree.max_id().await
    }

    /// Value bytes stored at `version`
    pub async fn value(&self, version: u64) -> Result<Option<Bytes>> {
        self.tree.get(version).await
    }

    /// Latest `(version, value)` pair, or `None` for an empty history
    pub async fn latest(&self) -> Result<Option<(u64, Bytes)>> {
        match self.latest_version().await? {
            Some(version) => Ok(self.value(version).await?.map(|value| (version, value))),
            None => Ok(None),
        }
    }

    /// Append the value for `version`. Rewriting an existing version raises
    /// a duplicate-key error.
    pub async fn set_value(&mut self, version: u64, value: Bytes) -> Result<bool> {
        self.tree.set(version, value).await
    }

    /// Persist pending versions and return the new root digest
    pub async fn commit(&mut self) -> Result<Option<NodeDigest>> {
        self.tree.commit().await
    }

    /// Discard pending versions
    pub async fn cancel(&mut self) -> Result<()> {
        self.tree.cancel().await
    }

    /// Digest of the last committed history, if any
    pub fn root_digest(&self) -> Option<NodeDigest> {
        self.tree.root_digest()
    }

    /// Whether there are uncommitted versions
    pub fn is_dirty(&self) -> bool {
        self.tree.is_dirty()
    }
}

impl<S: NodeStore> Clone for KeyVersionTree<S> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
        }
    }
}
