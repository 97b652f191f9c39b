//! Error types for the tessera-core crate

use thiserror::Error;

/// Result type alias using `TreeError`
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors that can occur in tree engine operations
///
/// Absent keys and versions are never errors; lookups report them as
/// `Ok(None)`.
#[derive(Error, Debug)]
pub enum TreeError {
    /// Id or version outside the tree's fixed address space
    #[error("id {id} outside tree capacity {capacity}")]
    CapacityExceeded { id: u64, capacity: u64 },

    /// Write to an id that already holds a value
    #[error("id {0} already written")]
    DuplicateKey(u64),

    /// Loaded node bytes do not hash to the digest used to address them
    #[error("node {digest} failed hash verification")]
    IntegrityFailure { digest: String },

    /// A referenced node is missing from the store
    #[error("node {digest} missing from store")]
    MissingNode { digest: String },

    /// Persisting content whose digest key already exists, with strict
    /// duplicate reporting enabled
    #[error("node {digest} already persisted")]
    StorageConflict { digest: String },

    /// A deserialized hash bucket contains a key that does not hash to the
    /// bucket's own address
    #[error("bucket {bucket_id:#x} contains a key hashing to a different address")]
    InconsistentBucket { bucket_id: u64 },

    /// Malformed node or payload bytes
    #[error("malformed node bytes: {0}")]
    Decode(String),

    /// Block store error
    #[error("store error: {0}")]
    Store(#[from] tessera_store::StoreError),
}
