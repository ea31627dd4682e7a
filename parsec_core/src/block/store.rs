use bytes::Bytes;
use futures::StreamExt;
use moka::sync::Cache;
use std::sync::Arc;
use tracing::debug;

use super::{BlockError, BlockResult};
use crate::{
    BlockId,
    store::{Store, StoreError},
};

/// Number of blocks kept by the default read cache.
pub const DEFAULT_CACHE_CAPACITY: u64 = 1024;

/// High-level block API built on top of a generic `Store`.
///
/// Blocks are write-once: a created id never changes content, so the LRU
/// cache never needs invalidation except on delete. The cache is shared by
/// every clone of the `BlockStore`.
#[derive(Clone)]
pub struct BlockStore {
    store: Arc<dyn Store>,
    cache: Cache<BlockId, Bytes>,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("store", &self.store)
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

impl BlockStore {
    pub fn new<S>(store: S) -> Self
    where
        S: Store + 'static,
    {
        Self::with_cache_capacity(store, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity<S>(store: S, capacity: u64) -> Self
    where
        S: Store + 'static,
    {
        Self::from_arc(Arc::new(store), capacity)
    }

    pub fn from_arc(store: Arc<dyn Store>, capacity: u64) -> Self {
        Self {
            store,
            cache: Cache::new(capacity),
        }
    }

    /// Stores `content` and returns its id.
    ///
    /// With `id == None` a fresh random id is assigned.
    pub async fn create(&self, content: Bytes, id: Option<BlockId>) -> BlockResult<BlockId> {
        let id = id.unwrap_or_else(BlockId::random);
        self.store
            .put_bytes(id.as_str(), content.clone())
            .await
            .map_err(|err| BlockError::from_store(&id, err))?;
        debug!(block = %id, len = content.len(), "block created");
        self.cache.insert(id.clone(), content);
        Ok(id)
    }

    pub async fn read(&self, id: &BlockId) -> BlockResult<Bytes> {
        if let Some(content) = self.cache.get(id) {
            return Ok(content);
        }
        let content = self
            .store
            .open_read_bytes(id.as_str(), 0, None)
            .await
            .map_err(|err| BlockError::from_store(id, err))?;
        self.cache.insert(id.clone(), content.clone());
        Ok(content)
    }

    /// Deletes a block. A block that is already gone is not an error.
    pub async fn delete(&self, id: &BlockId) -> BlockResult<()> {
        self.cache.invalidate(id);
        match self.store.delete(id.as_str()).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => {
                debug!(block = %id, "delete of missing block ignored");
                Ok(())
            }
            Err(err) => Err(BlockError::from_store(id, err)),
        }
    }

    pub async fn contains(&self, id: &BlockId) -> BlockResult<bool> {
        if self.cache.contains_key(id) {
            return Ok(true);
        }
        self.store
            .exists(id.as_str())
            .await
            .map_err(|err| BlockError::from_store(id, err))
    }

    /// Lists every block id held by the underlying store.
    pub async fn list(&self) -> BlockResult<Vec<BlockId>> {
        let mut stream = self
            .store
            .list()
            .await
            .map_err(|err| BlockError::Backend(err.to_string()))?;
        let mut ids = Vec::new();
        while let Some(path) = stream.next().await {
            let path = path.map_err(|err| BlockError::Backend(err.to_string()))?;
            ids.push(BlockId::new(path));
        }
        Ok(ids)
    }

    pub fn cached_len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
