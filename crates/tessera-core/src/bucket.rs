//! Hash buckets
//!
//! All keys hashing to the same 60-bit address share one bucket, stored as a
//! single leaf payload of the outer tree. A bucket is an ascending-by-key
//! list of key-index entries, each pairing the original key bytes with that
//! key's version tree. Collisions are resolved by linear scan inside the
//! bucket rather than further hashing.

use crate::codec;
use crate::error::{Result, TreeError};
use crate::keyhash::KeyHasher;
use crate::options::TreeOptions;
use crate::version::KeyVersionTree;
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;
use tessera_store::NodeStore;

/// One key's latest state, as yielded by iteration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: Bytes,
    pub version: u64,
    pub value: Bytes,
}

struct BucketEntry<S: NodeStore> {
    key: Bytes,
    tree: KeyVersionTree<S>,
}

impl<S: NodeStore> Clone for BucketEntry<S> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            tree: self.tree.clone(),
        }
    }
}

/// Collision group of keys sharing one hashed address
pub struct HashBucket<S: NodeStore> {
    bucket_id: u64,
    /// Ascending by key bytes
    entries: Vec<BucketEntry<S>>,
    store: Arc<S>,
    options: TreeOptions,
    prefix: Bytes,
}

impl<S: NodeStore> std::fmt::Debug for HashBucket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashBucket")
            .field("bucket_id", &self.bucket_id)
            .field("entries", &self.entries.len())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<S: NodeStore> HashBucket<S> {
    /// Create an empty bucket for `bucket_id`
    pub fn new(bucket_id: u64, store: Arc<S>, options: TreeOptions, prefix: Bytes) -> Self {
        Self {
            bucket_id,
            entries: Vec::new(),
            store,
            options,
            prefix,
        }
    }

    /// The 60-bit address shared by every key in this bucket
    pub fn bucket_id(&self) -> u64 {
        self.bucket_id
    }

    /// Number of distinct keys in the bucket
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter().map(|entry| &entry.key)
    }

    fn find(&self, key: &[u8]) -> Option<&BucketEntry<S>> {
        self.entries.iter().find(|entry| entry.key.as_ref() == key)
    }

    /// Write `value` at `version` for `key`, creating the key's version tree
    /// on first write and keeping the entry list sorted
    pub async fn set(&mut self, key: &[u8], version: u64, value: Bytes) -> Result<bool> {
        // Linear scan; true collisions are exceedingly rare in a 60-bit space
        let mut insert_at = self.entries.len();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            match entry.key.as_ref().cmp(key) {
                Ordering::Equal => return entry.tree.set_value(version, value).await,
                Ordering::Greater => {
                    insert_at = i;
                    break;
                }
                Ordering::Less => {}
            }
        }

        let mut tree =
            KeyVersionTree::new(Arc::clone(&self.store), self.options, self.prefix.clone());
        let wrote = tree.set_value(version, value).await?;
        if wrote {
            self.entries.insert(
                insert_at,
                BucketEntry {
                    key: Bytes::copy_from_slice(key),
                    tree,
                },
            );
        }
        Ok(wrote)
    }

    /// Latest version number for `key`, or `None` if the key is absent
    pub async fn latest_version(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.find(key) {
            Some(entry) => entry.tree.latest_version().await,
            None => Ok(None),
        }
    }

    /// Value for `key` at `version`, or the latest value when `version` is
    /// `None`. Returns the `(version, value)` pair actually read.
    pub async fn value(&self, key: &[u8], version: Option<u64>) -> Result<Option<(u64, Bytes)>> {
        let Some(entry) = self.find(key) else {
            return Ok(None);
        };
        match version {
            Some(version) => Ok(entry
                .tree
                .value(version)
                .await?
                .map(|value| (version, value))),
            None => entry.tree.latest().await,
        }
    }

    /// Commit every contained version tree
    pub async fn commit(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            entry.tree.commit().await?;
        }
        Ok(())
    }

    /// Discard pending writes in every contained version tree; keys that
    /// were never committed drop out of the bucket
    pub async fn cancel(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            entry.tree.cancel().await?;
        }
        self.entries
            .retain(|entry| entry.tree.root_digest().is_some());
        Ok(())
    }

    /// Latest `(key, version, value)` record per key, ascending by key
    pub async fn latest_records(&self) -> Result<Vec<KeyRecord>> {
        let mut records = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let Some((version, value)) = entry.tree.latest().await? else {
                debug_assert!(false, "bucket entry with empty version tree");
                continue;
            };
            records.push(KeyRecord {
                key: entry.key.clone(),
                version,
                value,
            });
        }
        Ok(records)
    }

    /// Serialize as the ordered list of (key, version-tree root digest)
    /// pairs. Every version tree must have been committed first.
    pub fn to_bytes(&self) -> Bytes {
        let entries: Vec<(Bytes, _)> = self
            .entries
            .iter()
            .map(|entry| {
                let digest = entry
                    .tree
                    .root_digest()
                    .expect("version tree committed before bucket serialization");
                (entry.key.clone(), digest)
            })
            .collect();
        codec::encode_bucket(&entries)
    }

    /// Deserialize a bucket, validating that keys are strictly ascending and
    /// that every key hashes to the bucket's own address
    pub fn from_bytes(
        bucket_id: u64,
        bytes: &[u8],
        store: Arc<S>,
        options: TreeOptions,
        prefix: Bytes,
        hasher: &KeyHasher,
    ) -> Result<Self> {
        let raw = codec::decode_bucket(bytes)?;

        for pair in raw.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(TreeError::Decode("bucket keys out of order".into()));
            }
        }
        for (key, _) in &raw {
            if hasher.address(key) != bucket_id {
                return Err(TreeError::InconsistentBucket { bucket_id });
            }
        }

        let entries = raw
            .into_iter()
            .map(|(key, digest)| BucketEntry {
                key,
                tree: KeyVersionTree::open(
                    Arc::clone(&store),
                    options,
                    prefix.clone(),
                    digest,
                ),
            })
            .collect();

        Ok(Self {
            bucket_id,
            entries,
            store,
            options,
            prefix,
        })
    }
}

impl<S: NodeStore> Clone for HashBucket<S> {
    fn clone(&self) -> Self {
        Self {
            bucket_id: self.bucket_id,
            entries: self.entries.clone(),
            store: Arc::clone(&self.store),
            options: self.options,
            prefix: self.prefix.clone(),
        }
    }
}
