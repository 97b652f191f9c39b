//! # Tessera Core
//!
//! Authenticated versioned key-value engine for the Tessera ledger platform.
//!
//! This crate provides:
//! - **Merkle Sort Trees**: integer-indexed authenticated trees with
//!   incremental commit and rollback
//! - **Hash Buckets**: collision groups mapping arbitrary byte keys onto the
//!   60-bit address space
//! - **Key Version Trees**: append-only per-key value histories
//! - **Deterministic root digests**: one digest commits to the entire data
//!   set, independent of write order
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          MerkleHashSortTree             │
//! ├───────────────────┬─────────────────────┤
//! │    HashBucket     │    KeyVersionTree   │
//! ├───────────────────┴─────────────────────┤
//! │            MerkleSortTree               │
//! ├─────────────────────────────────────────┤
//! │             NodeStore                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The engine is deliberately not internally synchronized: the enclosing
//! ledger serializes all mutation of one tree instance, so every operation
//! takes `&self`/`&mut self` in the ordinary Rust ownership discipline.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{MerkleHashSortTree, TreeOptions};
//! use tessera_store::MemoryNodeStore;
//!
//! let store = Arc::new(MemoryNodeStore::new());
//! let mut tree = MerkleHashSortTree::new(store, TreeOptions::default(), &b"ledger/"[..]);
//! tree.set_data(b"alice", 0, &b"100"[..]).await?;
//! let root = tree.commit().await?;
//! ```

pub mod bucket;
pub mod codec;
pub mod error;
pub mod iter;
pub mod keyhash;
pub mod kv;
mod node;
pub mod options;
pub mod policy;
pub mod tree;
pub mod version;

pub use bucket::{HashBucket, KeyRecord};
pub use error::{Result, TreeError};
pub use iter::TreeIter;
pub use keyhash::KeyHasher;
pub use kv::{EntryIter, KeyHashBucketPolicy, MerkleHashSortTree, PendingWrite, TreeStats};
pub use options::{Degree, TreeOptions, CAPACITY};
pub use policy::{DataPolicy, OverwriteDataPolicy, PlainDataPolicy};
pub use tree::MerkleSortTree;
pub use version::KeyVersionTree;
