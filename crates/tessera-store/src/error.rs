//! Error types for the tessera-store crate

use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during node storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Invalid digest bytes or encoding
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
