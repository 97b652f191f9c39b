//! # Tessera Store
//!
//! Content-addressed node storage for the Tessera ledger storage engine.
//!
//! This crate provides:
//! - **Digests**: Pluggable cryptographic hashing (BLAKE3, SHA-256)
//! - **NodeStore trait**: Insert-if-absent, get-by-key byte storage
//! - **Memory store**: DashMap-backed store for tests and single-process use
//! - **Caching**: In-memory LRU read-through cache for hot nodes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Tree Engine Layer             │
//! ├─────────────────────────────────────────┤
//! │            NodeStore Trait              │
//! ├──────────────────┬──────────────────────┤
//! │ MemoryNodeStore  │   CachedNodeStore    │
//! └──────────────────┴──────────────────────┘
//! ```
//!
//! Every record is keyed by a caller-supplied namespace prefix concatenated
//! with the raw digest of its content, so multiple trees can safely share one
//! physical key space. Writes use an insert-if-absent policy: identical
//! content is deduplicated rather than rewritten.

pub mod digest;
pub mod error;
pub mod memory;

pub use digest::{HashAlgorithm, NodeDigest, DIGEST_BYTE_SIZE};
pub use error::{Result, StoreError};
pub use memory::{CachedNodeStore, MemoryNodeStore};

use async_trait::async_trait;
use bytes::Bytes;

/// Trait for content-addressed node storage backends.
///
/// A `NodeStore` is append-only from the engine's perspective: records are
/// written at most once per key and never overwritten or deleted. Concurrency
/// discipline for a shared physical store is the store's own responsibility.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Retrieve the record stored under `key`, or `None` if absent.
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Store `value` under `key` only if the key is currently absent.
    ///
    /// Returns `true` if the record was written, `false` if a record already
    /// existed under `key` (the value is left untouched in that case).
    async fn put_new(&self, key: &[u8], value: Bytes) -> Result<bool>;

    /// Check whether a record exists under `key`.
    async fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Build the physical storage key for a node: `prefix ++ digest bytes`.
pub fn storage_key(prefix: &[u8], digest: &NodeDigest) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + DIGEST_BYTE_SIZE);
    key.extend_from_slice(prefix);
    key.extend_from_slice(digest.as_bytes());
    key
}
