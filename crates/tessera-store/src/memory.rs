//! In-memory node store for testing and single-process use

use crate::{NodeStore, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// An in-memory node store
#[derive(Clone, Default)]
pub struct MemoryNodeStore {
    records: Arc<DashMap<Vec<u8>, Bytes>>,
}

impl MemoryNodeStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    /// Get the number of records stored
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Get total size of all stored records
    pub fn total_size(&self) -> u64 {
        self.records
            .iter()
            .map(|entry| entry.value().len() as u64)
            .sum()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_new(&self, key: &[u8], value: Bytes) -> Result<bool> {
        // DashMap entry API gives the insert-if-absent check atomically
        match self.records.entry(key.to_vec()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.records.contains_key(key))
    }
}

/// LRU-cached read-through wrapper around any node store
pub struct CachedNodeStore<S: NodeStore> {
    inner: S,
    cache: Arc<parking_lot::Mutex<lru::LruCache<Vec<u8>, Bytes>>>,
}

impl<S: NodeStore> CachedNodeStore<S> {
    /// Create a new cached store with the given capacity
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            cache: Arc::new(parking_lot::Mutex::new(lru::LruCache::new(
                std::num::NonZeroUsize::new(capacity).unwrap(),
            ))),
        }
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Get the number of cached records
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[async_trait]
impl<S: NodeStore> NodeStore for CachedNodeStore<S> {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(data) = self.cache.lock().get(key) {
            return Ok(Some(data.clone()));
        }

        let data = self.inner.get(key).await?;
        if let Some(ref data) = data {
            self.cache.lock().put(key.to_vec(), data.clone());
        }
        Ok(data)
    }

    async fn put_new(&self, key: &[u8], value: Bytes) -> Result<bool> {
        let written = self.inner.put_new(key, value.clone()).await?;
        // Content addressing means the value is identical either way
        self.cache.lock().put(key.to_vec(), value);
        Ok(written)
    }

    async fn contains(&self, key: &[u8]) -> Result<bool> {
        if self.cache.lock().contains(key) {
            return Ok(true);
        }
        self.inner.contains(key).await
    }
}
