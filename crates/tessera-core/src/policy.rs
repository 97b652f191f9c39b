//! Data policies
//!
//! A data policy controls how leaf payloads are created, merged, counted,
//! committed, canceled, converted to and from bytes, and expanded into
//! logical items during iteration. It is the one polymorphic seam of the
//! tree: the same integer-indexed structure stores plain byte values, value
//! version histories, and whole hash buckets, differing only in the policy
//! injected at construction.

use crate::{Result, TreeError};
use async_trait::async_trait;
use bytes::Bytes;

/// Pluggable leaf-payload strategy for a [`MerkleSortTree`](crate::MerkleSortTree)
#[async_trait]
pub trait DataPolicy: Send + Sync {
    /// What callers pass to `set`
    type Input: Send;
    /// What a leaf slot holds in memory
    type Payload: Clone + Send + Sync;
    /// What one payload expands to during iteration
    type Item: Send;

    /// Merge an incoming write into the payload at `id`.
    ///
    /// `current` is `None` when the id has never been written. Returns `true`
    /// if the payload changed, `false` for a benign no-op; policies that
    /// forbid rewriting raise instead.
    async fn update(
        &self,
        id: u64,
        current: &mut Option<Self::Payload>,
        incoming: Self::Input,
    ) -> Result<bool>;

    /// Hook run on a dirty payload immediately before it is serialized and
    /// hashed; used to cascade-commit nested structures.
    async fn before_commit(&self, id: u64, payload: &mut Self::Payload) -> Result<()>;

    /// Logical item count contributed by this payload
    fn count(&self, id: u64, payload: &Self::Payload) -> u64;

    /// Hook run on each dirty payload being discarded by `cancel`
    async fn after_cancel(&self, id: u64, payload: Self::Payload) -> Result<()>;

    /// Serialize a payload to its canonical leaf bytes
    fn encode(&self, payload: &Self::Payload) -> Result<Bytes>;

    /// Deserialize a payload from leaf bytes
    fn decode(&self, id: u64, bytes: &[u8]) -> Result<Self::Payload>;

    /// Expand one physical leaf payload into its logical items, in ascending
    /// order
    async fn expand(&self, id: u64, payload: &Self::Payload) -> Result<Vec<Self::Item>>;
}

/// Default policy: opaque byte payloads, one item per id, rewrites rejected.
///
/// This is the policy version histories are built on - once an id is
/// written it can never be replaced.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainDataPolicy;

#[async_trait]
impl DataPolicy for PlainDataPolicy {
    type Input = Bytes;
    type Payload = Bytes;
    type Item = Bytes;

    async fn update(
        &self,
        id: u64,
        current: &mut Option<Bytes>,
        incoming: Bytes,
    ) -> Result<bool> {
        if current.is_some() {
            return Err(TreeError::DuplicateKey(id));
        }
        *current = Some(incoming);
        Ok(true)
    }

    async fn before_commit(&self, _id: u64, _payload: &mut Bytes) -> Result<()> {
        Ok(())
    }

    fn count(&self, _id: u64, _payload: &Bytes) -> u64 {
        1
    }

    async fn after_cancel(&self, _id: u64, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    fn encode(&self, payload: &Bytes) -> Result<Bytes> {
        Ok(payload.clone())
    }

    fn decode(&self, _id: u64, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    async fn expand(&self, _id: u64, payload: &Bytes) -> Result<Vec<Bytes>> {
        Ok(vec![payload.clone()])
    }
}

/// Like [`PlainDataPolicy`] but rewrites silently replace the old value
#[derive(Clone, Copy, Debug, Default)]
pub struct OverwriteDataPolicy;

#[async_trait]
impl DataPolicy for OverwriteDataPolicy {
    type Input = Bytes;
    type Payload = Bytes;
    type Item = Bytes;

    async fn update(
        &self,
        _id: u64,
        current: &mut Option<Bytes>,
        incoming: Bytes,
    ) -> Result<bool> {
        *current = Some(incoming);
        Ok(true)
    }

    async fn before_commit(&self, _id: u64, _payload: &mut Bytes) -> Result<()> {
        Ok(())
    }

    fn count(&self, _id: u64, _payload: &Bytes) -> u64 {
        1
    }

    async fn after_cancel(&self, _id: u64, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    fn encode(&self, payload: &Bytes) -> Result<Bytes> {
        Ok(payload.clone())
    }

    fn decode(&self, _id: u64, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    async fn expand(&self, _id: u64, payload: &Bytes) -> Result<Vec<Bytes>> {
        Ok(vec![payload.clone()])
    }
}
