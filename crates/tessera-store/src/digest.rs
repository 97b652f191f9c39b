//! Digest types and pluggable hashing
//!
//! A node's digest is the cryptographic hash of its canonical serialized
//! bytes. It doubles as the node's storage address, which is what gives the
//! store automatic deduplication and unmodified-subtree reuse.

use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a node digest in bytes (256 bits)
pub const DIGEST_BYTE_SIZE: usize = 32;

/// Type alias for raw digest bytes
pub type DigestBytes = [u8; DIGEST_BYTE_SIZE];

/// A node digest with convenience methods
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDigest(DigestBytes);

impl NodeDigest {
    /// Create a new digest from bytes
    pub fn new(bytes: DigestBytes) -> Self {
        Self(bytes)
    }

    /// Create a digest from an arbitrary byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DIGEST_BYTE_SIZE {
            return Err(StoreError::InvalidDigest(format!(
                "digest must be {} bytes, got {}",
                DIGEST_BYTE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; DIGEST_BYTE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Create a digest from a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| StoreError::InvalidDigest(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Get the digest as bytes
    pub fn as_bytes(&self) -> &DigestBytes {
        &self.0
    }

    /// Convert to a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check if this digest is all zeros
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for NodeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeDigest({})", self.to_hex())
    }
}

impl fmt::Display for NodeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for NodeDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<DigestBytes> for NodeDigest {
    fn from(bytes: DigestBytes) -> Self {
        Self(bytes)
    }
}

impl From<NodeDigest> for DigestBytes {
    fn from(digest: NodeDigest) -> Self {
        digest.0
    }
}

/// Selectable digest function for node hashing.
///
/// The algorithm must be fixed per tree: a reader reattaching to a committed
/// root digest has to hash with the same function the writer used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// BLAKE3 (default)
    #[default]
    Blake3,
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Hash `data` with this algorithm
    pub fn digest(&self, data: &[u8]) -> NodeDigest {
        match self {
            HashAlgorithm::Blake3 => NodeDigest(*blake3::hash(data).as_bytes()),
            HashAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(data);
                NodeDigest(hasher.finalize().into())
            }
        }
    }

    /// Get a human-readable identifier
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha-256",
        }
    }

    /// Parse from an identifier
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blake3" => Some(HashAlgorithm::Blake3),
            "sha-256" => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_consistency() {
        let data = b"test data";
        let d1 = HashAlgorithm::Blake3.digest(data);
        let d2 = HashAlgorithm::Blake3.digest(data);
        assert_eq!(d1, d2);
        assert!(!d1.is_zero());
    }

    #[test]
    fn test_different_algorithms_differ() {
        let data = b"test data";
        let blake = HashAlgorithm::Blake3.digest(data);
        let sha = HashAlgorithm::Sha256.digest(data);
        assert_ne!(blake, sha);
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = HashAlgorithm::Blake3.digest(b"round trip");
        let parsed = NodeDigest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(NodeDigest::from_slice(&[0u8; 16]).is_err());
        assert!(NodeDigest::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_algorithm_name_roundtrip() {
        for algo in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            assert_eq!(HashAlgorithm::from_name(algo.name()), Some(algo));
        }
        assert_eq!(HashAlgorithm::from_name("md5"), None);
    }
}
