//! Authenticated key-value facade
//!
//! `MerkleHashSortTree` is the public engine surface: arbitrary byte keys
//! with append-only version histories, authenticated by a single root
//! digest. Keys are hashed to 60-bit addresses; each address holds a hash
//! bucket, itself a leaf payload of an outer Merkle sort tree, and the
//! bucket policy cascades commit, cancel, counting, and iteration into the
//! per-key version trees.

use crate::bucket::{HashBucket, KeyRecord};
use crate::error::{Result, TreeError};
use crate::iter::TreeIter;
use crate::keyhash::KeyHasher;
use crate::options::{TreeOptions, CAPACITY};
use crate::policy::DataPolicy;
use crate::tree::MerkleSortTree;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tessera_store::{NodeDigest, NodeStore};
use tracing::instrument;

/// A key-value write on its way into a bucket
#[derive(Clone, Debug)]
pub struct PendingWrite {
    pub key: Bytes,
    pub version: u64,
    pub value: Bytes,
}

/// Data policy storing hash buckets as leaf payloads of the outer tree
pub struct KeyHashBucketPolicy<S: NodeStore> {
    store: Arc<S>,
    options: TreeOptions,
    prefix: Bytes,
    hasher: KeyHasher,
}

impl<S: NodeStore> KeyHashBucketPolicy<S> {
    /// Create a bucket policy for trees built over `store` under `prefix`
    pub fn new(store: Arc<S>, options: TreeOptions, prefix: Bytes, hasher: KeyHasher) -> Self {
        Self {
            store,
            options,
            prefix,
            hasher,
        }
    }
}

impl<S: NodeStore> Clone for KeyHashBucketPolicy<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options,
            prefix: self.prefix.clone(),
            hasher: self.hasher,
        }
    }
}

#[async_trait]
impl<S: NodeStore> DataPolicy for KeyHashBucketPolicy<S> {
    type Input = PendingWrite;
    type Payload = HashBucket<S>;
    type Item = KeyRecord;

    async fn update(
        &self,
        id: u64,
        current: &mut Option<HashBucket<S>>,
        incoming: PendingWrite,
    ) -> Result<bool> {
        match current {
            Some(bucket) => {
                bucket
                    .set(&incoming.key, incoming.version, incoming.value)
                    .await
            }
            None => {
                let mut bucket = HashBucket::new(
                    id,
                    Arc::clone(&self.store),
                    self.options,
                    self.prefix.clone(),
                );
                let wrote = bucket
                    .set(&incoming.key, incoming.version, incoming.value)
                    .await?;
                if wrote {
                    *current = Some(bucket);
                }
                Ok(wrote)
            }
        }
    }

    async fn before_commit(&self, _id: u64, bucket: &mut HashBucket<S>) -> Result<()> {
        bucket.commit().await
    }

    fn count(&self, _id: u64, bucket: &HashBucket<S>) -> u64 {
        bucket.len() as u64
    }

    async fn after_cancel(&self, _id: u64, mut bucket: HashBucket<S>) -> Result<()> {
        bucket.cancel().await
    }

    fn encode(&self, bucket: &HashBucket<S>) -> Result<Bytes> {
        Ok(bucket.to_bytes())
    }

    fn decode(&self, id: u64, bytes: &[u8]) -> Result<HashBucket<S>> {
        HashBucket::from_bytes(
            id,
            bytes,
            Arc::clone(&self.store),
            self.options,
            self.prefix.clone(),
            &self.hasher,
        )
    }

    async fn expand(&self, _id: u64, bucket: &HashBucket<S>) -> Result<Vec<KeyRecord>> {
        bucket.latest_records().await
    }
}

/// Snapshot of a tree's shape and commit state
#[derive(Clone, Debug)]
pub struct TreeStats {
    pub degree: u64,
    pub committed_root: Option<NodeDigest>,
    pub dirty: bool,
}

/// The authenticated versioned key-value engine
pub struct MerkleHashSortTree<S: NodeStore> {
    tree: MerkleSortTree<KeyHashBucketPolicy<S>, S>,
    hasher: KeyHasher,
}

impl<S: NodeStore> MerkleHashSortTree<S> {
    /// Create a new empty engine writing nodes under `prefix`
    pub fn new(store: Arc<S>, options: TreeOptions, prefix: impl Into<Bytes>) -> Self {
        let prefix = prefix.into();
        let hasher = KeyHasher::new();
        let policy = KeyHashBucketPolicy {
            store: Arc::clone(&store),
            options,
            prefix: prefix.clone(),
            hasher,
        };
        Self {
            tree: MerkleSortTree::new(store, options, prefix, policy),
            hasher,
        }
    }

    /// Reattach to a previously committed root digest
    pub fn open(
        store: Arc<S>,
        options: TreeOptions,
        prefix: impl Into<Bytes>,
        root_digest: NodeDigest,
    ) -> Self {
        let prefix = prefix.into();
        let hasher = KeyHasher::new();
        let policy = KeyHashBucketPolicy {
            store: Arc::clone(&store),
            options,
            prefix: prefix.clone(),
            hasher,
        };
        Self {
            tree: MerkleSortTree::open(store, options, prefix, policy, root_digest),
            hasher,
        }
    }

    /// Write `value` at `version` for `key`.
    ///
    /// Versions are append-only: rewriting an existing version raises a
    /// duplicate-key error. Returns `false` only for policy-level no-ops.
    #[instrument(level = "debug", skip(self, key, value))]
    pub async fn set_data(
        &mut self,
        key: &[u8],
        version: u64,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        if version >= CAPACITY {
            return Err(TreeError::CapacityExceeded {
                id: version,
                capacity: CAPACITY,
            });
        }
        let address = self.hasher.address(key);
        self.tree
            .set(
                address,
                PendingWrite {
                    key: Bytes::copy_from_slice(key),
                    version,
                    value: value.into(),
                },
            )
            .await
    }

    /// Read `key` at `version`, or its latest version when `version` is
    /// `None`. Absent keys and versions read as `None`.
    #[instrument(level = "debug", skip(self, key))]
    pub async fn get_data(&self, key: &[u8], version: Option<u64>) -> Result<Option<KeyRecord>> {
        let address = self.hasher.address(key);
        let Some(bucket) = self.tree.get(address).await? else {
            return Ok(None);
        };
        Ok(bucket
            .value(key, version)
            .await?
            .map(|(version, value)| KeyRecord {
                key: Bytes::copy_from_slice(key),
                version,
                value,
            }))
    }

    /// Latest version number for `key`, or `None` if the key is absent
    pub async fn latest_version(&self, key: &[u8]) -> Result<Option<u64>> {
        let address = self.hasher.address(key);
        match self.tree.get(address).await? {
            Some(bucket) => bucket.latest_version(key).await,
            None => Ok(None),
        }
    }

    /// Persist all pending writes and return the new root digest
    #[instrument(level = "debug", skip(self))]
    pub async fn commit(&mut self) -> Result<Option<NodeDigest>> {
        self.tree.commit().await
    }

    /// Discard all pending writes, restoring the last committed state
    #[instrument(level = "debug", skip(self))]
    pub async fn cancel(&mut self) -> Result<()> {
        self.tree.cancel().await
    }

    /// Digest authenticating the entire committed data set
    pub fn root_digest(&self) -> Option<NodeDigest> {
        self.tree.root_digest()
    }

    /// Whether there are uncommitted writes
    pub fn is_dirty(&self) -> bool {
        self.tree.is_dirty()
    }

    /// Number of distinct keys, pending writes included
    pub async fn len(&self) -> Result<u64> {
        self.tree.len().await
    }

    /// Whether no keys are stored at all
    pub async fn is_empty(&self) -> Result<bool> {
        self.tree.is_empty().await
    }

    /// Lazy cursor over every key's latest record, ascending by hashed
    /// address and, within a bucket, by key bytes
    pub fn iter(&self) -> EntryIter<'_, S> {
        EntryIter {
            inner: self.tree.iter(),
        }
    }

    /// Shape and commit-state snapshot
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            degree: self.tree.options().degree.width(),
            committed_root: self.tree.root_digest(),
            dirty: self.tree.is_dirty(),
        }
    }
}

/// Lazy cursor over one record per key
pub struct EntryIter<'a, S: NodeStore> {
    inner: TreeIter<'a, KeyHashBucketPolicy<S>, S>,
}

impl<S: NodeStore> EntryIter<'_, S> {
    /// Next record, or `None` once exhausted
    pub async fn next(&mut self) -> Result<Option<KeyRecord>> {
        Ok(self.inner.next().await?.map(|(_, record)| record))
    }

    /// Skip up to `n` records without materializing them
    pub async fn skip(&mut self, n: u64) -> Result<u64> {
        self.inner.skip(n).await
    }
}
