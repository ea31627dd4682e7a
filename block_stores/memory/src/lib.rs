use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, Stream};
use parsec_core::store::{PutResponse, StoreError, StoreFeatures, StoreResult};

use std::io;

#[derive(Debug)]
pub struct MemoryStore {
    blocks: DashMap<String, Bytes>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self {
            blocks: DashMap::new(),
        }
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl parsec_core::store::Store for MemoryStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_list: true,
            case_sensitive: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.blocks.contains_key(path))
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        self.blocks.insert(path.to_string(), bytes);
        Ok(())
    }

    /// Returns the bytes stored at `path`, sliced to `offset..offset+max_len`.
    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        let block = self.blocks.get(path).ok_or(StoreError::NotFound)?;
        let block_len = block.len();
        let start = offset as usize;

        if start >= block_len {
            return Ok(Bytes::new());
        }

        let remaining = block_len - start;
        let len = match max_len {
            Some(max) => std::cmp::min(remaining, max as usize),
            None => remaining,
        };

        Ok(block.slice(start..start + len))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let block = self.blocks.get(path).ok_or(StoreError::NotFound)?;
        Ok(block.len() as u64)
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, io::Error>> + Send + Unpin + 'static>>
    {
        let keys: Vec<Result<String, io::Error>> = self
            .blocks
            .iter()
            .map(|entry| Ok(entry.key().clone()))
            .collect();
        Ok(Box::new(stream::iter(keys)))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.blocks.remove(path).ok_or(StoreError::NotFound)?;
        Ok(())
    }
}
